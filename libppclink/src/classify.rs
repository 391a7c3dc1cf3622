//! The relocation classifier: one deterministic pass over every input
//! section's relocations, deciding which auxiliary entries each reference
//! needs and cataloguing branch sites for later reachability analysis.
//! Errors are collected, not thrown, so one run surfaces as many problems
//! as possible; only the final result consults the sink.

use crate::arch::PowerPcArch;
use crate::branches::BranchReference;
use crate::diagnostics::DiagnosticKind;
use crate::error::Result;
use crate::got::GotKey;
use crate::got::GotKind;
use crate::model::Location;
use crate::model::ObjectId;
use crate::model::RelocationRecord;
use crate::model::SymbolRef;
use crate::model::SymbolView;
use crate::model::symbol_view;
use crate::session::LinkSession;
use crate::stub_group;
use crate::tls_opt::SequenceKey;
use crate::tls_opt::TlsDowngrade;
use crate::tls_opt::TlsModel;
use ppclink_utils::elf::RelocationKind;
use ppclink_utils::elf::RelocationSize;
use ppclink_utils::elf::shf;

#[tracing::instrument(skip_all, name = "Classify")]
pub(crate) fn run<A: PowerPcArch>(session: &mut LinkSession<A>) -> Result {
    session.code_order = stub_group::code_section_order(&session.objects);

    for object_index in 0..session.objects.len() {
        let object_id = ObjectId(object_index as u32);
        for section_index in 0..session.objects[object_index].sections.len() {
            classify_section::<A>(session, object_id, section_index)?;
        }
    }

    tracing::debug!(
        got_size = session.got.size(),
        branches = session.branches.len(),
        "classification done"
    );
    Ok(())
}

fn classify_section<A: PowerPcArch>(
    session: &mut LinkSession<A>,
    object_id: ObjectId,
    section_index: usize,
) -> Result {
    // Relocation records are immutable and small; snapshotting them keeps
    // the borrow on the session simple.
    let relocations =
        session.objects[object_id.as_usize()].sections[section_index].relocations.clone();
    let section_flags = session.objects[object_id.as_usize()].sections[section_index].flags;
    let is_executable = section_flags.contains(shf::EXECINSTR);
    // TOC-save markers that appeared before their branch was catalogued.
    let mut deferred_toc_saves = Vec::new();
    let mut skip_next = false;

    for (index, rel) in relocations.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        let Some(info) = A::relocation_from_raw_opt(rel.r_type) else {
            session.diagnostics.error(
                DiagnosticKind::UnsupportedRelocation,
                format!(
                    "Unsupported relocation type {} at {}+0x{:x}",
                    A::rel_type_to_string(rel.r_type),
                    session.objects[object_id.as_usize()].name,
                    rel.offset,
                ),
            );
            continue;
        };
        let view = symbol_view(&session.objects, &session.symbols, rel.symbol)?;

        match info.kind {
            RelocationKind::None
            | RelocationKind::Relative
            | RelocationKind::TocRelative
            | RelocationKind::TocBase
            | RelocationKind::DtpRel => {}

            RelocationKind::Absolute => {
                classify_absolute::<A>(session, object_id, section_index, rel, &info.size, view);
            }

            RelocationKind::Branch | RelocationKind::CondBranch => {
                classify_branch::<A>(session, object_id, section_index, rel, view, is_executable);
            }

            RelocationKind::AbsBranch | RelocationKind::AbsCondBranch => {
                if session.options.output_kind.is_relocatable() {
                    session.diagnostics.error(
                        DiagnosticKind::UnsupportedRelocation,
                        format!(
                            "{} is only legal in position-dependent output",
                            A::rel_type_to_string(rel.r_type)
                        ),
                    );
                }
            }

            RelocationKind::Got => {
                session.got.add(
                    GotKey {
                        symbol: rel.symbol,
                        kind: GotKind::Standard,
                        addend: rel.addend,
                    },
                    view.flags,
                );
            }
            RelocationKind::GotRelative => {
                session.saw_pcrel_input = true;
                session.got.add(
                    GotKey {
                        symbol: rel.symbol,
                        kind: GotKind::Standard,
                        addend: rel.addend,
                    },
                    view.flags,
                );
            }
            RelocationKind::PltPcRel => {
                session.saw_pcrel_input = true;
                session.plt.add(rel.symbol, view.flags);
            }

            RelocationKind::GotDtpRel => {
                session.got.add(
                    GotKey {
                        symbol: rel.symbol,
                        kind: GotKind::DtpRel,
                        addend: rel.addend,
                    },
                    view.flags,
                );
            }

            RelocationKind::TlsGdGot => {
                let decision = decide_tls::<A>(
                    session,
                    object_id,
                    section_index,
                    &relocations,
                    index,
                    TlsModel::GeneralDynamic,
                    view,
                );
                match decision {
                    TlsDowngrade::Keep => {
                        session.got.add(
                            GotKey {
                                symbol: rel.symbol,
                                kind: GotKind::TlsGdPair,
                                addend: rel.addend,
                            },
                            view.flags,
                        );
                    }
                    TlsDowngrade::ToInitialExec => {
                        session.got.add(
                            GotKey {
                                symbol: rel.symbol,
                                kind: GotKind::TpRel,
                                addend: rel.addend,
                            },
                            view.flags,
                        );
                    }
                    // Local-exec needs no GOT slot at all.
                    TlsDowngrade::ToLocalExec => {}
                }
            }
            RelocationKind::TlsLdGot => {
                let decision = decide_tls::<A>(
                    session,
                    object_id,
                    section_index,
                    &relocations,
                    index,
                    TlsModel::LocalDynamic,
                    view,
                );
                if decision == TlsDowngrade::Keep {
                    session.got.tlsld();
                }
            }
            RelocationKind::GotTpRel => {
                let decision = decide_tls::<A>(
                    session,
                    object_id,
                    section_index,
                    &relocations,
                    index,
                    TlsModel::InitialExec,
                    view,
                );
                if decision != TlsDowngrade::ToLocalExec {
                    session.got.add(
                        GotKey {
                            symbol: rel.symbol,
                            kind: GotKind::TpRel,
                            addend: rel.addend,
                        },
                        view.flags,
                    );
                }
            }

            RelocationKind::TpRel => {
                if session.options.output_kind == crate::args::OutputKind::SharedObject {
                    session.diagnostics.error(
                        DiagnosticKind::UnsupportedRelocation,
                        format!(
                            "{} requires the thread-pointer offset to be known at link \
                             time and cannot be used in a shared object",
                            A::rel_type_to_string(rel.r_type)
                        ),
                    );
                }
            }

            RelocationKind::TlsGdMarker | RelocationKind::TlsLdMarker => {
                let model = if info.kind == RelocationKind::TlsGdMarker {
                    TlsModel::GeneralDynamic
                } else {
                    TlsModel::LocalDynamic
                };
                match check_marker_adjacency::<A>(&relocations, index) {
                    Ok(()) => {
                        let decision = session.tls.decide(
                            SequenceKey {
                                object: object_id,
                                section: section_index,
                                offset: rel.offset,
                            },
                            model,
                            is_tls_value_final(view),
                        );
                        if decision != TlsDowngrade::Keep {
                            // The helper call is rewritten away, so its
                            // relocation must not allocate a PLT entry or a
                            // catalogued branch.
                            skip_next = true;
                        }
                    }
                    Err(message) => {
                        session
                            .diagnostics
                            .error(DiagnosticKind::BrokenTlsSequence, message);
                    }
                }
            }
            RelocationKind::TlsMarker => {
                // Pairing for initial-exec sequences is checked at the
                // GOT_TPREL site; the marker itself allocates nothing.
            }
            RelocationKind::TocSaveMarker => {
                if !session
                    .branches
                    .mark_toc_save(object_id, section_index, rel.offset)
                {
                    deferred_toc_saves.push(rel.offset);
                }
            }
        }
    }

    for offset in deferred_toc_saves {
        if !session.branches.mark_toc_save(object_id, section_index, offset) {
            tracing::debug!(
                object = %object_id,
                section_index,
                offset,
                "TOC-save marker without a catalogued call site"
            );
        }
    }
    Ok(())
}

fn classify_absolute<A: PowerPcArch>(
    session: &mut LinkSession<A>,
    object_id: ObjectId,
    section_index: usize,
    rel: &RelocationRecord,
    size: &RelocationSize,
    view: SymbolView,
) {
    // Indirect functions cannot be referenced directly; the canonical
    // address is the PLT dispatch stub.
    if view.flags.is_ifunc() {
        session.plt.add(rel.symbol, view.flags);
        return;
    }

    // ELFv1: taking the address of a function must yield its descriptor.
    if A::has_function_descriptors() && view.flags.is_function() {
        if let Some(code) = definition_of(session, rel.symbol) {
            session.function_descriptors.add(rel.symbol, code);
        }
    }

    let is_word = *size == RelocationSize::ByteSize(A::WORD_BYTES as usize);
    if !session.options.output_kind.is_relocatable() || !is_word {
        return;
    }
    let section = &session.objects[object_id.as_usize()].sections[section_index];
    let writable = section.flags.contains(shf::WRITE);
    if view.flags.is_dynamic() || view.flags.is_interposable() {
        if writable {
            session.dynamic_input_relocation(
                object_id,
                section_index,
                rel.offset,
                ppclink_utils::elf::DynamicRelocationKind::Absolute,
                Some(rel.symbol),
                rel.addend,
            );
        } else {
            session.diagnostics.error(
                DiagnosticKind::UnsupportedRelocation,
                format!(
                    "Direct relocation ({}) to dynamic symbol from non-writable section",
                    A::rel_type_to_string(rel.r_type)
                ),
            );
        }
    } else if view.flags.is_address() {
        if writable {
            session.dynamic_input_relocation(
                object_id,
                section_index,
                rel.offset,
                ppclink_utils::elf::DynamicRelocationKind::Relative,
                None,
                rel.addend,
            );
        } else {
            session.diagnostics.error(
                DiagnosticKind::UnsupportedRelocation,
                format!(
                    "Cannot apply relocation {} to read-only section in \
                     position-independent output",
                    A::rel_type_to_string(rel.r_type)
                ),
            );
        }
    }
}

fn classify_branch<A: PowerPcArch>(
    session: &mut LinkSession<A>,
    object_id: ObjectId,
    section_index: usize,
    rel: &RelocationRecord,
    view: SymbolView,
    is_executable: bool,
) {
    if needs_plt_call(session, view) {
        session.plt.add(rel.symbol, view.flags);
    }
    if !is_executable {
        // A branch outside executable code can never be redirected to a
        // stub; catalogue it anyway so the failure mode reports an address.
        tracing::debug!(
            object = %object_id,
            section_index,
            offset = rel.offset,
            "branch relocation in non-executable section"
        );
    }
    session.branches.push(BranchReference {
        object: object_id,
        section: section_index,
        offset: rel.offset,
        r_type: rel.r_type,
        symbol: rel.symbol,
        addend: rel.addend,
        uses_toc_save: false,
    });
}

fn needs_plt_call<A: PowerPcArch>(session: &LinkSession<A>, view: SymbolView) -> bool {
    if view.flags.is_ifunc() {
        return true;
    }
    if view.flags.is_dynamic() {
        return true;
    }
    view.flags.is_interposable()
        && !session.options.output_kind.is_static_executable()
        && view.flags.is_function()
}

fn definition_of<A: PowerPcArch>(
    session: &LinkSession<A>,
    symbol: SymbolRef,
) -> Option<Location> {
    match symbol {
        SymbolRef::Global(id) => session.symbols.get(id).definition,
        SymbolRef::Local { object, index } => {
            let local = session.objects[object.as_usize()].local_symbol(index).ok()?;
            local.section.map(|section| Location {
                object,
                section,
                offset: local.offset,
            })
        }
    }
}

/// Whether the thread-pointer offset of the accessed variable is fixed at
/// link time.
fn is_tls_value_final(view: SymbolView) -> bool {
    !view.flags.is_dynamic()
}

/// A TLS marker must sit on the helper-call branch: the very next
/// relocation record, at the same offset, of branch kind.
fn check_marker_adjacency<A: PowerPcArch>(
    relocations: &[RelocationRecord],
    marker_index: usize,
) -> Result<(), String> {
    let marker = &relocations[marker_index];
    let Some(next) = relocations.get(marker_index + 1) else {
        return Err(format!(
            "TLS marker {} at offset 0x{:x} has no following relocation",
            A::rel_type_to_string(marker.r_type),
            marker.offset,
        ));
    };
    let next_is_call = next.offset == marker.offset
        && A::relocation_from_raw_opt(next.r_type)
            .is_some_and(|info| info.kind == RelocationKind::Branch);
    if next_is_call {
        Ok(())
    } else {
        Err(format!(
            "TLS marker {} at offset 0x{:x} is not paired with a helper call",
            A::rel_type_to_string(marker.r_type),
            marker.offset,
        ))
    }
}

/// Finds the marker that terminates the TLS sequence an arg-setup
/// relocation belongs to, scanning forward through the section's records.
fn find_sequence_marker<A: PowerPcArch>(
    relocations: &[RelocationRecord],
    from: usize,
    symbol: SymbolRef,
    model: TlsModel,
) -> Option<u64> {
    let wanted = match model {
        TlsModel::GeneralDynamic => RelocationKind::TlsGdMarker,
        TlsModel::LocalDynamic => RelocationKind::TlsLdMarker,
        TlsModel::InitialExec => RelocationKind::TlsMarker,
        TlsModel::LocalExec => return None,
    };
    relocations[from..].iter().find_map(|rel| {
        let info = A::relocation_from_raw_opt(rel.r_type)?;
        (info.kind == wanted && (rel.symbol == symbol || model == TlsModel::LocalDynamic))
            .then_some(rel.offset)
    })
}

/// The downgrade decision for the sequence containing the arg-setup
/// relocation at `index`. Sequences with no recognizable marker keep their
/// access model.
fn decide_tls<A: PowerPcArch>(
    session: &mut LinkSession<A>,
    object_id: ObjectId,
    section_index: usize,
    relocations: &[RelocationRecord],
    index: usize,
    model: TlsModel,
    view: SymbolView,
) -> TlsDowngrade {
    let rel = &relocations[index];
    let Some(marker_offset) =
        find_sequence_marker::<A>(relocations, index + 1, rel.symbol, model)
    else {
        return TlsDowngrade::Keep;
    };
    session.tls.decide(
        SequenceKey {
            object: object_id,
            section: section_index,
            offset: marker_offset,
        },
        model,
        is_tls_value_final(view),
    )
}

/// Re-derives the downgrade decision for an arg-setup site during the apply
/// pass, from the cache populated at classification time.
pub(crate) fn tls_decision_at_apply<A: PowerPcArch>(
    session: &LinkSession<A>,
    object_id: ObjectId,
    section_index: usize,
    relocations: &[RelocationRecord],
    index: usize,
    model: TlsModel,
) -> TlsDowngrade {
    let rel = &relocations[index];
    let Some(marker_offset) =
        find_sequence_marker::<A>(relocations, index + 1, rel.symbol, model)
    else {
        return TlsDowngrade::Keep;
    };
    session.tls.decision_for(SequenceKey {
        object: object_id,
        section: section_index,
        offset: marker_offset,
    })
}
