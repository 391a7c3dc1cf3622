//! The final relocation application pass. All addresses are fixed by now:
//! this pass resolves each relocation's value, redirects out-of-range
//! branches to their stubs, performs the cached TLS downgrades and the
//! optional TOC shortening, and patches section bytes using the bit-exact
//! field placement rules. Overflow errors are collected per relocation and
//! the pass keeps going, so a failed link still yields bytes worth
//! disassembling.

use crate::arch::PowerPcArch;
use crate::artifacts::BackendArtifacts;
use crate::classify::tls_decision_at_apply;
use crate::diagnostics::DiagnosticKind;
use crate::diagnostics::DiagnosticSink;
use crate::diagnostics::Severity;
use crate::error::Result;
use crate::got::GotKey;
use crate::got::GotKind;
use crate::model::ObjectId;
use crate::model::RelocationRecord;
use crate::model::SymbolRef;
use crate::model::symbol_view;
use crate::plt::PltPool;
use crate::session::LinkSession;
use crate::stub_group;
use crate::stubs::CallStubKey;
use crate::tls_opt::SequenceKey;
use crate::tls_opt::TlsDowngrade;
use crate::tls_opt::TlsModel;
use ppclink_utils::elf::InsnField;
use ppclink_utils::elf::RelocationKind;
use ppclink_utils::elf::RelocationKindInfo;
use ppclink_utils::elf::RelocationSize;
use ppclink_utils::elf::ValueSlice;
use ppclink_utils::insn;
use ppclink_utils::powerpc64::RelaxationKind;
use smallvec::SmallVec;
use smallvec::smallvec;

#[tracing::instrument(skip_all, name = "Apply")]
pub(crate) fn run<A: PowerPcArch>(session: &mut LinkSession<A>) -> Result<BackendArtifacts> {
    let mut diagnostics = std::mem::take(&mut session.diagnostics);

    for object_index in 0..session.objects.len() {
        let object_id = ObjectId(object_index as u32);
        for section_index in 0..session.objects[object_index].sections.len() {
            if session.objects[object_index].sections[section_index].relocations.is_empty() {
                continue;
            }
            let mut bytes =
                std::mem::take(&mut session.objects[object_index].sections[section_index].bytes);
            let relocations = session.objects[object_index].sections[section_index]
                .relocations
                .clone();
            apply_section::<A>(
                session,
                object_id,
                section_index,
                &relocations,
                &mut bytes,
                &mut diagnostics,
            )?;
            session.objects[object_index].sections[section_index].bytes = bytes;
        }
    }

    let artifacts = emit::<A>(session);
    session.diagnostics = diagnostics;
    session.diagnostics.ensure_no_errors()?;
    Ok(artifacts)
}

fn apply_section<A: PowerPcArch>(
    session: &LinkSession<A>,
    object_id: ObjectId,
    section_index: usize,
    relocations: &[RelocationRecord],
    bytes: &mut [u8],
    diagnostics: &mut DiagnosticSink,
) -> Result {
    let section = &session.objects[object_id.as_usize()].sections[section_index];
    let Some(section_address) = session.layout.section_address(object_id, section_index) else {
        return Ok(());
    };
    let is_alloc = section.is_alloc();
    let is_executable = section.is_executable();
    let e = A::ENDIAN;
    let mut skip_next = false;

    for (index, rel) in relocations.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        // Unknown types were already reported during classification.
        let Some(info) = A::relocation_from_raw_opt(rel.r_type) else {
            continue;
        };
        let place = section_address + rel.offset;
        let view = symbol_view(&session.objects, &session.symbols, rel.symbol)?;

        let mut rewrite = RelaxationKind::NoOp;
        let value: i64;
        let mut write_info = info;
        let mut check = true;

        match info.kind {
            RelocationKind::None => continue,
            RelocationKind::TocSaveMarker => continue,

            RelocationKind::TlsGdMarker | RelocationKind::TlsLdMarker => {
                let decision = session.tls.decision_for(SequenceKey {
                    object: object_id,
                    section: section_index,
                    offset: rel.offset,
                });
                let call_rewrite = match (info.kind, decision) {
                    (_, TlsDowngrade::Keep) => None,
                    (RelocationKind::TlsGdMarker, TlsDowngrade::ToLocalExec) => {
                        Some(RelaxationKind::ReplaceWithNop)
                    }
                    (RelocationKind::TlsGdMarker, TlsDowngrade::ToInitialExec) => {
                        Some(RelaxationKind::CallToAddTp)
                    }
                    (RelocationKind::TlsLdMarker, _) => Some(RelaxationKind::CallToDtvBase),
                    _ => None,
                };
                if let Some(kind) = call_rewrite {
                    kind.apply(e, bytes, rel.offset);
                    // The helper-call relocation right after the marker must
                    // not be applied over the rewritten instruction.
                    skip_next = true;
                }
                continue;
            }

            RelocationKind::TlsMarker => {
                let decision = session.tls.decision_for(SequenceKey {
                    object: object_id,
                    section: section_index,
                    offset: rel.offset,
                });
                if decision == TlsDowngrade::ToLocalExec {
                    RelaxationKind::AddToAddi.apply(e, bytes, rel.offset);
                    let tprel = self::tprel::<A>(session, rel)?;
                    write_value(
                        A::ENDIAN,
                        &RelocationKindInfo {
                            kind: RelocationKind::TpRel,
                            size: RelocationSize::Insn(InsnField::D16),
                            slice: ValueSlice::Lo,
                            range: ppclink_utils::elf::AllowedRange::no_check(),
                            alignment: 1,
                        },
                        tprel,
                        &mut bytes[rel.offset as usize..],
                    );
                }
                continue;
            }

            RelocationKind::Branch | RelocationKind::CondBranch => {
                let target =
                    resolve_branch_target::<A>(session, object_id, section_index, rel, view)?;
                value = target.wrapping_sub(place) as i64;
                if info.verify(value).is_err() {
                    // Best-effort direct encoding, per the historical
                    // permissiveness for unfixable branches.
                    diagnostics.warn(
                        DiagnosticKind::UnreachableBranch,
                        format!(
                            "Branch at {}+0x{:x} cannot reach its target \
                             (displacement 0x{value:x})",
                            session.objects[object_id.as_usize()].name,
                            rel.offset,
                        ),
                    );
                    check = false;
                }
            }

            RelocationKind::AbsBranch | RelocationKind::AbsCondBranch => {
                value = resolve_symbol_address::<A>(session, rel, view)?
                    .wrapping_add(rel.addend as u64) as i64;
            }

            RelocationKind::Absolute => {
                value = resolve_symbol_address::<A>(session, rel, view)?
                    .wrapping_add(rel.addend as u64) as i64;
            }
            RelocationKind::Relative => {
                value = resolve_symbol_address::<A>(session, rel, view)?
                    .wrapping_add(rel.addend as u64)
                    .wrapping_sub(place) as i64;
            }
            RelocationKind::TocRelative => {
                value = resolve_symbol_address::<A>(session, rel, view)?
                    .wrapping_add(rel.addend as u64)
                    .wrapping_sub(session.layout.toc_base) as i64;
                if session.options.toc_optimize && is_executable {
                    rewrite = toc_optimize_rewrite(&info, value);
                    if rewrite == RelaxationKind::ReplaceWithNop {
                        write_info.size = RelocationSize::ByteSize(0);
                    }
                }
            }
            RelocationKind::TocBase => {
                value = session.layout.toc_base.wrapping_add(rel.addend as u64) as i64;
            }

            RelocationKind::Got => {
                value = got_slot_toc_offset::<A>(session, rel, GotKind::Standard)?;
            }
            RelocationKind::GotRelative => {
                let slot = got_slot_address::<A>(session, rel, GotKind::Standard)?;
                value = slot.wrapping_sub(place) as i64;
            }
            RelocationKind::PltPcRel => {
                let (pool, offset) = session
                    .plt
                    .lookup(rel.symbol, view.flags)
                    .ok_or_else(|| anyhow::anyhow!("PLT entry missing at apply time"))?;
                value = plt_slot_address(session, pool, offset).wrapping_sub(place) as i64;
            }

            RelocationKind::TlsGdGot => {
                match tls_decision_at_apply::<A>(
                    session,
                    object_id,
                    section_index,
                    relocations,
                    index,
                    TlsModel::GeneralDynamic,
                ) {
                    TlsDowngrade::Keep => {
                        value = got_slot_toc_offset::<A>(session, rel, GotKind::TlsGdPair)?;
                    }
                    TlsDowngrade::ToInitialExec => {
                        value = got_slot_toc_offset::<A>(session, rel, GotKind::TpRel)?;
                        if info.slice == ValueSlice::Lo {
                            // addi rt,rt,lo -> ld rt,lo(rt)
                            rewrite = RelaxationKind::AddiToLd;
                            write_info.size = RelocationSize::Insn(InsnField::Ds16);
                        }
                    }
                    TlsDowngrade::ToLocalExec => {
                        value = self::tprel::<A>(session, rel)?;
                        if matches!(info.slice, ValueSlice::Hi | ValueSlice::HiAdjusted) {
                            // addis rt,r2,ha -> addis rt,r13,ha
                            rewrite = RelaxationKind::SetBaseToTp;
                        }
                    }
                }
            }
            RelocationKind::TlsLdGot => {
                match tls_decision_at_apply::<A>(
                    session,
                    object_id,
                    section_index,
                    relocations,
                    index,
                    TlsModel::LocalDynamic,
                ) {
                    TlsDowngrade::Keep => {
                        let slot = session
                            .got
                            .tlsld_entry()
                            .ok_or_else(|| anyhow::anyhow!("TLSLD entry missing at apply"))?;
                        value = (session.layout.got_address + slot)
                            .wrapping_sub(session.layout.toc_base)
                            as i64;
                    }
                    // The helper call alone computes the DTV base; both
                    // setup instructions become nops.
                    _ => {
                        rewrite = RelaxationKind::ReplaceWithNop;
                        write_info.size = RelocationSize::ByteSize(0);
                        value = 0;
                    }
                }
            }
            RelocationKind::GotTpRel => {
                match tls_decision_at_apply::<A>(
                    session,
                    object_id,
                    section_index,
                    relocations,
                    index,
                    TlsModel::InitialExec,
                ) {
                    TlsDowngrade::ToLocalExec => {
                        if matches!(info.slice, ValueSlice::Hi | ValueSlice::HiAdjusted) {
                            // The addis of the pair disappears entirely.
                            rewrite = RelaxationKind::ReplaceWithNop;
                            write_info.size = RelocationSize::ByteSize(0);
                            value = 0;
                        } else {
                            // ld rt,lo(rt) -> addis rt,r13,tprel@ha
                            rewrite = RelaxationKind::LdToAddisFromTp;
                            write_info.size = RelocationSize::Insn(InsnField::D16);
                            write_info.slice = ValueSlice::HiAdjusted;
                            write_info.alignment = 1;
                            value = self::tprel::<A>(session, rel)?;
                        }
                    }
                    _ => {
                        value = got_slot_toc_offset::<A>(session, rel, GotKind::TpRel)?;
                    }
                }
            }
            RelocationKind::GotDtpRel => {
                value = got_slot_toc_offset::<A>(session, rel, GotKind::DtpRel)?;
            }
            RelocationKind::TpRel => {
                value = self::tprel::<A>(session, rel)?;
            }
            RelocationKind::DtpRel => {
                value = resolve_symbol_address::<A>(session, rel, view)?
                    .wrapping_add(rel.addend as u64)
                    .wrapping_sub(session.layout.dtv_base()) as i64;
            }
        }

        rewrite.apply(e, bytes, rel.offset);

        if check && write_info.slice == ValueSlice::Full {
            if let Err(error) = write_info.verify(value) {
                let severity = if is_alloc {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                diagnostics.report(
                    DiagnosticKind::RelocationOverflow,
                    severity,
                    format!(
                        "{} at {}+0x{:x}: {error}",
                        A::rel_type_to_string(rel.r_type),
                        session.objects[object_id.as_usize()].name,
                        rel.offset,
                    ),
                );
                continue;
            }
        }

        write_value(e, &write_info, value, &mut bytes[rel.offset as usize..]);
    }
    Ok(())
}

/// Shortens a TOC-relative access whose offset fits the immediate field:
/// the addis of the pair becomes a nop and the dependent instruction is
/// re-based onto r2 directly. Purely a size/clarity optimization.
fn toc_optimize_rewrite(info: &RelocationKindInfo, value: i64) -> RelaxationKind {
    if !(-0x8000..0x8000).contains(&value) {
        return RelaxationKind::NoOp;
    }
    match info.slice {
        ValueSlice::HiAdjusted | ValueSlice::Hi => RelaxationKind::ReplaceWithNop,
        ValueSlice::Lo => RelaxationKind::SetBaseToToc,
        _ => RelaxationKind::NoOp,
    }
}

fn write_value(
    e: object::Endianness,
    info: &RelocationKindInfo,
    value: i64,
    bytes: &mut [u8],
) {
    let sliced = info.slice.apply(value as u64);
    match info.size {
        RelocationSize::ByteSize(0) => {}
        RelocationSize::ByteSize(2) => insn::write_u16(e, bytes, sliced as u16),
        RelocationSize::ByteSize(4) => insn::write_u32(e, bytes, sliced as u32),
        RelocationSize::ByteSize(8) => insn::write_u64(e, bytes, sliced),
        RelocationSize::ByteSize(other) => {
            unreachable!("No {other}-byte PowerPC relocations")
        }
        RelocationSize::Insn(field) => field.write(e, bytes, sliced),
    }
}

/// A symbol's address for data references: the function descriptor on
/// ELFv1, the canonical PLT slot for ifuncs, the plain value otherwise.
fn resolve_symbol_address<A: PowerPcArch>(
    session: &LinkSession<A>,
    rel: &RelocationRecord,
    view: crate::model::SymbolView,
) -> Result<u64> {
    if view.flags.is_ifunc() {
        if let Some((pool, offset)) = session.plt.lookup(rel.symbol, view.flags) {
            return Ok(plt_slot_address(session, pool, offset));
        }
    }
    if A::has_function_descriptors() && view.flags.is_function() {
        if let Some(offset) = session.function_descriptors.lookup(rel.symbol) {
            return Ok(session.layout.function_descriptor_address + offset);
        }
    }
    session
        .layout
        .symbol_value(&session.objects, &session.symbols, rel.symbol)
}

fn plt_slot_address<A: PowerPcArch>(session: &LinkSession<A>, pool: PltPool, offset: u64) -> u64 {
    let base = match pool {
        PltPool::Global => session.layout.plt_address,
        PltPool::Local => session.layout.local_plt_address,
        PltPool::LocalIfunc => session.layout.iplt_address,
    };
    base + offset
}

fn got_slot_address<A: PowerPcArch>(
    session: &LinkSession<A>,
    rel: &RelocationRecord,
    kind: GotKind,
) -> Result<u64> {
    let slot = session
        .got
        .lookup(&GotKey {
            symbol: rel.symbol,
            kind,
            addend: rel.addend,
        })
        .ok_or_else(|| {
            anyhow::anyhow!("GOT slot missing at apply time for {:?}", rel.symbol)
        })?;
    Ok(session.layout.got_address + slot)
}

fn got_slot_toc_offset<A: PowerPcArch>(
    session: &LinkSession<A>,
    rel: &RelocationRecord,
    kind: GotKind,
) -> Result<i64> {
    Ok(got_slot_address::<A>(session, rel, kind)?.wrapping_sub(session.layout.toc_base) as i64)
}

fn tprel<A: PowerPcArch>(session: &LinkSession<A>, rel: &RelocationRecord) -> Result<i64> {
    let value = session
        .layout
        .symbol_value(&session.objects, &session.symbols, rel.symbol)?;
    Ok(value
        .wrapping_add(rel.addend as u64)
        .wrapping_sub(session.layout.thread_pointer()) as i64)
}

/// Mirrors the relaxation driver's decision for a branch site: stub address
/// when the site was given a stub, direct target otherwise.
fn resolve_branch_target<A: PowerPcArch>(
    session: &LinkSession<A>,
    object_id: ObjectId,
    section_index: usize,
    rel: &RelocationRecord,
    view: crate::model::SymbolView,
) -> Result<u64> {
    let plt_slot = session.plt.lookup(rel.symbol, view.flags);
    let direct_target = || -> Result<u64> {
        let value = session
            .layout
            .symbol_value(&session.objects, &session.symbols, rel.symbol)?;
        let local_entry = if A::is_notoc_branch(rel.r_type) {
            0
        } else {
            A::local_entry_offset(view.st_other)?
        };
        Ok(value
            .wrapping_add(local_entry)
            .wrapping_add(rel.addend as u64))
    };

    let code_index = session
        .code_order
        .iter()
        .position(|&key| key == (object_id, section_index));
    let groups: SmallVec<[usize; 3]> = match code_index.and_then(|ci| {
        stub_group::group_of(&session.groups, ci)
    }) {
        Some(own) => {
            let mut candidates: SmallVec<[usize; 3]> = smallvec![own];
            if !session.options.stubs_always_after_branches() {
                if own > 0 {
                    candidates.push(own - 1);
                }
                if own + 1 < session.stub_tables.len() {
                    candidates.push(own + 1);
                }
            }
            candidates
        }
        None => SmallVec::new(),
    };

    if let Some(..) = plt_slot {
        let key = CallStubKey {
            symbol: rel.symbol,
            addend: rel.addend,
        };
        for &group in &groups {
            if let Some(address) = session.stub_tables[group].call_stub_address(&key) {
                return Ok(address);
            }
        }
        // No stub table covered this site; fall through to the direct
        // target and let the range check warn.
        return direct_target();
    }

    let target = direct_target()?;
    let info = A::relocation_from_raw(rel.r_type)?;
    let section_address = session
        .layout
        .section_address(object_id, section_index)
        .unwrap_or(0);
    let displacement = target.wrapping_sub(section_address + rel.offset) as i64;
    if (info.range.min..info.range.max).contains(&displacement) {
        return Ok(target);
    }
    for &group in &groups {
        if let Some(address) = session.stub_tables[group].long_branch_stub_address(target) {
            return Ok(address);
        }
    }
    Ok(target)
}

/// Emits the generated sections once addresses are final.
fn emit<A: PowerPcArch>(session: &mut LinkSession<A>) -> BackendArtifacts {
    let e = A::ENDIAN;
    let word = A::WORD_BYTES;
    let layout = &session.layout;
    let mut artifacts = BackendArtifacts::default();

    // GOT contents. Slots with dynamic relocations stay zero for the
    // loader to fill.
    let mut got_bytes = vec![0u8; session.got.size() as usize];
    for entry in session.got.entries() {
        let offset = entry.offset as usize;
        let value = match entry.key.kind {
            GotKind::Standard => symbol_or_zero(session, entry.key.symbol)
                .wrapping_add(entry.key.addend as u64),
            GotKind::TpRel => symbol_or_zero(session, entry.key.symbol)
                .wrapping_add(entry.key.addend as u64)
                .wrapping_sub(layout.thread_pointer()),
            GotKind::DtpRel => symbol_or_zero(session, entry.key.symbol)
                .wrapping_add(entry.key.addend as u64)
                .wrapping_sub(layout.dtv_base()),
            GotKind::TlsGdPair | GotKind::TlsLdPair => {
                // Module ID 1 is the executable itself; the offset word
                // follows.
                if !session.options.output_kind.is_relocatable() {
                    write_got_word(e, word, &mut got_bytes[offset..], 1);
                    let dtprel = symbol_or_zero(session, entry.key.symbol)
                        .wrapping_add(entry.key.addend as u64)
                        .wrapping_sub(layout.dtv_base());
                    write_got_word(
                        e,
                        word,
                        &mut got_bytes[offset + word as usize..],
                        dtprel,
                    );
                }
                continue;
            }
        };
        let has_dynamic = session
            .got
            .dynamic_relocations()
            .iter()
            .any(|r| r.offset == entry.offset);
        if !has_dynamic {
            write_got_word(e, word, &mut got_bytes[offset..], value);
        }
    }
    if let Some(offset) = session.got.tlsld_entry() {
        if !session.options.output_kind.is_relocatable() {
            write_got_word(e, word, &mut got_bytes[offset as usize..], 1);
        }
    }
    artifacts.got_bytes = got_bytes;

    // PLT pools. Only eager local slots hold link-time values.
    artifacts.plt_bytes = vec![0u8; session.plt.size(PltPool::Global) as usize];
    artifacts.iplt_bytes = vec![0u8; session.plt.size(PltPool::LocalIfunc) as usize];
    let mut local_plt = vec![0u8; session.plt.size(PltPool::Local) as usize];
    for entry in session.plt.entries(PltPool::Local) {
        if entry.relocation.is_some() {
            continue;
        }
        let value = symbol_or_zero(session, entry.symbol);
        let at = entry.offset as usize;
        if A::has_function_descriptors() {
            insn::write_u64(e, &mut local_plt[at..], value);
            insn::write_u64(e, &mut local_plt[at + 8..], layout.toc_base);
        } else if word == 8 {
            insn::write_u64(e, &mut local_plt[at..], value);
        } else {
            insn::write_u32(e, &mut local_plt[at..], value as u32);
        }
    }
    artifacts.local_plt_bytes = local_plt;

    // Branch lookup table: one full-width destination per slot.
    let mut brlt = vec![0u8; session.branch_lookup.size() as usize];
    for entry in session.branch_lookup.entries() {
        insn::write_u64(e, &mut brlt[entry.offset as usize..], entry.destination);
    }
    artifacts.branch_lookup_bytes = brlt;

    // Function descriptors: entry point, TOC pointer, environment.
    let mut opd = vec![0u8; session.function_descriptors.size() as usize];
    for descriptor in session.function_descriptors.entries() {
        let code = session
            .layout
            .resolve_location(descriptor.code)
            .unwrap_or(0);
        let at = descriptor.offset as usize;
        insn::write_u64(e, &mut opd[at..], code);
        insn::write_u64(e, &mut opd[at + 8..], layout.toc_base);
    }
    artifacts.function_descriptor_bytes = opd;

    // Stub tables, staged through the session arena.
    let ctx = session.stub_context();
    for index in 0..session.stub_tables.len() {
        let stub_bytes = session.stub_tables[index].emit(&ctx);
        if let Some(block) = session.stub_blocks[index] {
            session.arena.bytes_mut(block).copy_from_slice(&stub_bytes);
            artifacts
                .stub_bytes
                .push(session.arena.bytes(block).to_vec());
        } else {
            artifacts.stub_bytes.push(stub_bytes);
        }
    }

    artifacts.dynamic_relocations = session
        .got
        .dynamic_relocations()
        .iter()
        .chain(session.plt.dynamic_relocations())
        .chain(session.branch_lookup.dynamic_relocations())
        .chain(&session.input_dynamic)
        .copied()
        .collect();
    artifacts.synthetic_symbols = session.synthetic_stub_symbols();
    artifacts
}

fn write_got_word(e: object::Endianness, word: u64, bytes: &mut [u8], value: u64) {
    if word == 8 {
        insn::write_u64(e, bytes, value);
    } else {
        insn::write_u32(e, bytes, value as u32);
    }
}

fn symbol_or_zero<A: PowerPcArch>(session: &LinkSession<A>, symbol: SymbolRef) -> u64 {
    session
        .layout
        .symbol_value(&session.objects, &session.symbols, symbol)
        .unwrap_or(0)
}
