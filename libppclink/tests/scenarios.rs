//! End-to-end scenarios driving the whole backend pipeline: classify,
//! relax to a fixpoint, apply. Each test builds a small synthetic input
//! the way the generic linker core would hand it over.

use libppclink::LinkSession;
use libppclink::Ppc64;
use libppclink::args::OutputKind;
use libppclink::args::SessionOptions;
use libppclink::model::GlobalSymbol;
use libppclink::model::InputObject;
use libppclink::model::InputSection;
use libppclink::model::Location;
use libppclink::model::ObjectId;
use libppclink::model::RelocationRecord;
use libppclink::model::SymbolRef;
use libppclink::plt::PltPool;
use libppclink::stubs::StubFlags;
use libppclink::value_flags::ValueFlags;
use object::Endianness;
use ppclink_utils::elf::InsnField;
use ppclink_utils::elf::SectionFlags;
use ppclink_utils::elf::ppc64x;
use ppclink_utils::elf::shf;
use ppclink_utils::insn;

const E: Endianness = Endianness::Little;

fn exec_flags() -> SectionFlags {
    SectionFlags::empty().with(shf::ALLOC).with(shf::EXECINSTR)
}

fn tls_flags() -> SectionFlags {
    SectionFlags::empty().with(shf::ALLOC).with(shf::WRITE).with(shf::TLS)
}

fn text_section(words: &[u32], relocations: Vec<RelocationRecord>) -> InputSection {
    let mut bytes = vec![0u8; words.len() * 4];
    for (index, &word) in words.iter().enumerate() {
        insn::write_u32(E, &mut bytes[index * 4..], word);
    }
    InputSection {
        name: ".text".to_owned(),
        bytes,
        flags: exec_flags(),
        alignment: 4,
        relocations,
    }
}

fn rel(offset: u64, r_type: u32, symbol: SymbolRef, addend: i64) -> RelocationRecord {
    RelocationRecord {
        offset,
        r_type,
        symbol,
        addend,
    }
}

fn static_exe_options() -> SessionOptions {
    SessionOptions {
        output_kind: OutputKind::StaticExecutable,
        ..Default::default()
    }
}

fn read_word(section_bytes: &[u8], offset: usize) -> u32 {
    insn::read_u32(E, &section_bytes[offset..])
}

/// Scenario 1: a call to a preemptible function must go through a call
/// stub that jumps indirectly via the function's PLT slot, with the
/// original branch retargeted at the stub.
#[test]
fn call_through_plt_gets_a_stub() {
    let mut session = LinkSession::<Ppc64>::new(SessionOptions {
        output_kind: OutputKind::DynamicExecutable,
        ..Default::default()
    });
    let callee = session.add_symbol(GlobalSymbol {
        name: "external_fn".to_owned(),
        definition: None,
        absolute_value: 0,
        st_other: 0,
        flags: ValueFlags::DYNAMIC | ValueFlags::FUNCTION,
    });
    session
        .add_object(InputObject {
            name: "caller.o".to_owned(),
            sections: vec![text_section(
                &[insn::bl(0), insn::NOP],
                vec![rel(0, object::elf::R_PPC64_REL24, SymbolRef::Global(callee), 0)],
            )],
            local_symbols: Vec::new(),
            attributes: Default::default(),
        })
        .unwrap();

    let artifacts = session.link().unwrap();

    // One jump-slot PLT entry for the callee.
    assert_eq!(session.plt.entries(PltPool::Global).len(), 1);
    assert!(
        artifacts
            .dynamic_relocations
            .iter()
            .any(|r| r.kind == ppclink_utils::elf::DynamicRelocationKind::JumpSlot)
    );

    // The branch now targets the stub table.
    let section_address = session.layout.section_address(ObjectId(0), 0).unwrap();
    let branch = InsnField::Branch24.read(E, &session.objects[0].sections[0].bytes);
    let target = section_address.wrapping_add(branch as u64);
    assert_eq!(target, session.layout.stub_table_addresses[0]);

    // The stub saves r2, loads the PLT word and jumps through ctr; the
    // shared r2-restore helper follows it.
    let stub = &artifacts.stub_bytes[0];
    assert_eq!(read_word(stub, 0), insn::STD_R2_24_R1);
    assert_eq!(read_word(stub, 8), insn::mtctr(12));
    assert_eq!(read_word(stub, 12), insn::BCTR);
    assert_eq!(read_word(stub, stub.len() - 4), insn::BLR);
    assert_eq!(
        artifacts.synthetic_symbols[0].name,
        "__plt_call.external_fn"
    );
}

/// Scenario 2: a general-dynamic TLS sequence in a static executable
/// downgrades to local-exec: no GOT pair, the arg setup rewritten to a
/// thread-pointer pair, the helper call nop-ed out.
#[test]
fn tls_gd_downgrades_to_local_exec_in_static_link() {
    let mut session = LinkSession::<Ppc64>::new(static_exe_options());
    let tls_var = session.add_symbol(GlobalSymbol {
        name: "tls_var".to_owned(),
        definition: Some(Location {
            object: ObjectId(0),
            section: 1,
            offset: 0,
        }),
        absolute_value: 0,
        st_other: 0,
        flags: ValueFlags::TLS | ValueFlags::NON_INTERPOSABLE,
    });
    let helper = session.add_symbol(GlobalSymbol {
        name: "__tls_get_addr".to_owned(),
        definition: Some(Location {
            object: ObjectId(0),
            section: 0,
            offset: 16,
        }),
        absolute_value: 0,
        st_other: 0,
        flags: ValueFlags::FUNCTION | ValueFlags::NON_INTERPOSABLE,
    });
    let x = SymbolRef::Global(tls_var);
    session
        .add_object(InputObject {
            name: "tls.o".to_owned(),
            sections: vec![
                text_section(
                    &[
                        insn::addis(3, 2, 0), // addis r3,r2,x@got@tlsgd@ha
                        insn::addi(3, 3, 0),  // addi r3,r3,x@got@tlsgd@l
                        insn::bl(0),          // bl __tls_get_addr(x@tlsgd)
                        insn::NOP,
                        insn::BLR,
                    ],
                    vec![
                        rel(0, object::elf::R_PPC64_GOT_TLSGD16_HA, x, 0),
                        rel(4, object::elf::R_PPC64_GOT_TLSGD16_LO, x, 0),
                        rel(8, object::elf::R_PPC64_TLSGD, x, 0),
                        rel(8, object::elf::R_PPC64_REL24, SymbolRef::Global(helper), 0),
                    ],
                ),
                InputSection {
                    name: ".tdata".to_owned(),
                    bytes: vec![0; 8],
                    flags: tls_flags(),
                    alignment: 8,
                    relocations: Vec::new(),
                },
            ],
            local_symbols: Vec::new(),
            attributes: Default::default(),
        })
        .unwrap();

    session.link().unwrap();

    // No GOT pair was ever allocated.
    assert_eq!(session.got.size(), 0);
    assert!(session.plt.entries(PltPool::Global).is_empty());

    // tls_var sits at the very start of the TLS block, so its
    // thread-pointer offset is exactly -0x7000.
    let bytes = &session.objects[0].sections[0].bytes;
    assert_eq!(read_word(bytes, 0), insn::addis(3, 13, 0));
    assert_eq!(read_word(bytes, 4), insn::addi(3, 3, 0x9000));
    assert_eq!(read_word(bytes, 8), insn::NOP);
}

/// Scenario 3: two call sites to the same ifunc with different relocation
/// kinds share one PLT slot and one stub entry carrying both encoding
/// variants.
#[test]
fn mixed_relocation_kinds_share_one_stub_entry() {
    let mut session = LinkSession::<Ppc64>::new(static_exe_options());
    let ifunc = session.add_symbol(GlobalSymbol {
        name: "impl_picker".to_owned(),
        definition: Some(Location {
            object: ObjectId(0),
            section: 0,
            offset: 32,
        }),
        absolute_value: 0,
        st_other: 0,
        flags: ValueFlags::IFUNC | ValueFlags::FUNCTION | ValueFlags::NON_INTERPOSABLE,
    });
    let f = SymbolRef::Global(ifunc);
    session
        .add_object(InputObject {
            name: "calls.o".to_owned(),
            sections: vec![text_section(
                &[
                    insn::bl(0),
                    insn::NOP,
                    insn::bl(0),
                    insn::NOP,
                    insn::BLR,
                    insn::BLR,
                    insn::BLR,
                    insn::BLR,
                    insn::BLR,
                ],
                vec![
                    rel(0, object::elf::R_PPC64_REL24, f, 0),
                    rel(8, ppc64x::R_PPC64_REL24_NOTOC, f, 0),
                ],
            )],
            local_symbols: Vec::new(),
            attributes: Default::default(),
        })
        .unwrap();

    let artifacts = session.link().unwrap();

    assert_eq!(session.plt.entries(PltPool::LocalIfunc).len(), 1);
    let stubs = session.stub_tables[0].call_stubs();
    assert_eq!(stubs.len(), 1);
    assert!(stubs[0].flags.contains(StubFlags::TOC));
    assert!(stubs[0].flags.contains(StubFlags::NOTOC));
    assert!(
        artifacts
            .dynamic_relocations
            .iter()
            .any(|r| r.kind == ppclink_utils::elf::DynamicRelocationKind::Irelative)
    );
}

/// Scenario 4: sections that exceed the configured group span split into
/// two groups, each with its own stub table; one owner's stubs are never
/// divided across tables.
#[test]
fn group_span_overflow_starts_a_new_stub_table() {
    let mut session = LinkSession::<Ppc64>::new(SessionOptions {
        output_kind: OutputKind::DynamicExecutable,
        group_size: 0x1000,
        ..Default::default()
    });
    let callee = session.add_symbol(GlobalSymbol {
        name: "shared_fn".to_owned(),
        definition: None,
        absolute_value: 0,
        st_other: 0,
        flags: ValueFlags::DYNAMIC | ValueFlags::FUNCTION,
    });
    let call = |offset| rel(offset, object::elf::R_PPC64_REL24, SymbolRef::Global(callee), 0);
    let big_section = |len: usize| InputSection {
        name: ".text".to_owned(),
        bytes: vec![0; len],
        flags: exec_flags(),
        alignment: 4,
        relocations: vec![call(0)],
    };
    session
        .add_object(InputObject {
            name: "big.o".to_owned(),
            sections: vec![big_section(0x800), big_section(0x800), big_section(0x800)],
            local_symbols: Vec::new(),
            attributes: Default::default(),
        })
        .unwrap();

    let artifacts = session.link().unwrap();

    assert_eq!(session.groups.len(), 2);
    assert_eq!(session.groups[0].sections, 0..2);
    assert_eq!(session.groups[1].sections, 2..3);
    assert_eq!(artifacts.stub_bytes.len(), 2);
    // Both groups called the same function, so each table carries its own
    // copy of the call stub.
    assert_eq!(session.stub_tables[0].call_stubs().len(), 1);
    assert_eq!(session.stub_tables[1].call_stubs().len(), 1);
}

/// A branch exactly at the displacement boundary is encoded directly; one
/// word beyond it goes through a long-branch stub.
#[test]
fn branch_boundary_is_exact() {
    let link_with_target_at = |sym_offset: u64| {
        let mut session = LinkSession::<Ppc64>::new(static_exe_options());
        let target = session.add_symbol(GlobalSymbol {
            name: "far_fn".to_owned(),
            definition: Some(Location {
                object: ObjectId(0),
                section: 1,
                offset: sym_offset,
            }),
            absolute_value: 0,
            st_other: 0,
            flags: ValueFlags::FUNCTION | ValueFlags::NON_INTERPOSABLE,
        });
        session
            .add_object(InputObject {
                name: "far.o".to_owned(),
                sections: vec![
                    text_section(
                        &[insn::bl(0)],
                        vec![rel(0, object::elf::R_PPC64_REL24, SymbolRef::Global(target), 0)],
                    ),
                    text_section(&[insn::BLR, insn::BLR, insn::BLR, insn::BLR], Vec::new()),
                ],
                local_symbols: Vec::new(),
                attributes: Default::default(),
            })
            .unwrap();
        session.link().unwrap();
        session
    };

    // Section 1 starts 4 bytes after the call site.
    let at_boundary = link_with_target_at((1 << 25) - 8);
    assert!(at_boundary.stub_tables.iter().all(|t| t.is_empty()));
    let branch = InsnField::Branch24.read(E, &at_boundary.objects[0].sections[0].bytes);
    assert_eq!(branch, (1 << 25) - 4);

    let beyond = link_with_target_at((1 << 25) - 4);
    let stubbed: usize = beyond
        .stub_tables
        .iter()
        .map(|t| t.long_branch_stubs().len())
        .sum();
    assert_eq!(stubbed, 1);
    // The branch lands on the stub, not the target.
    let branch = InsnField::Branch24.read(E, &beyond.objects[0].sections[0].bytes);
    let section_address = beyond.layout.section_address(ObjectId(0), 0).unwrap();
    let resolved = section_address.wrapping_add(branch as u64);
    assert!(
        beyond
            .layout
            .stub_table_addresses
            .contains(&resolved)
    );
}

/// The callee's ELFv2 local entry offset is added to in-range branch
/// targets, and the encoded displacement round-trips exactly.
#[test]
fn branch_honors_local_entry_offset() {
    let mut session = LinkSession::<Ppc64>::new(static_exe_options());
    let callee = session.add_symbol(GlobalSymbol {
        name: "with_local_entry".to_owned(),
        definition: Some(Location {
            object: ObjectId(0),
            section: 1,
            offset: 0,
        }),
        absolute_value: 0,
        // Local entry is 8 bytes past the global entry.
        st_other: 3 << 5,
        flags: ValueFlags::FUNCTION | ValueFlags::NON_INTERPOSABLE,
    });
    session
        .add_object(InputObject {
            name: "le.o".to_owned(),
            sections: vec![
                text_section(
                    &[insn::bl(0)],
                    vec![rel(0, object::elf::R_PPC64_REL24, SymbolRef::Global(callee), 0)],
                ),
                text_section(&[insn::NOP, insn::NOP, insn::BLR], Vec::new()),
            ],
            local_symbols: Vec::new(),
            attributes: Default::default(),
        })
        .unwrap();
    session.link().unwrap();

    let branch = InsnField::Branch24.read(E, &session.objects[0].sections[0].bytes);
    let site = session.layout.section_address(ObjectId(0), 0).unwrap();
    let callee_value = session.layout.section_address(ObjectId(0), 1).unwrap();
    assert_eq!(site.wrapping_add(branch as u64), callee_value + 8);
}

/// Classification is deterministic: the same inputs produce the same slot
/// numbering and stub layout on every run.
#[test]
fn repeated_links_are_identical() {
    let build_and_link = || {
        let mut session = LinkSession::<Ppc64>::new(SessionOptions {
            output_kind: OutputKind::DynamicExecutable,
            ..Default::default()
        });
        let mut symbols = Vec::new();
        for index in 0..8 {
            symbols.push(session.add_symbol(GlobalSymbol {
                name: format!("fn_{index}"),
                definition: None,
                absolute_value: 0,
                st_other: 0,
                flags: ValueFlags::DYNAMIC | ValueFlags::FUNCTION,
            }));
        }
        let mut relocations = Vec::new();
        let mut words = Vec::new();
        for (index, symbol) in symbols.iter().enumerate() {
            words.push(insn::bl(0));
            words.push(insn::NOP);
            relocations.push(rel(
                index as u64 * 8,
                object::elf::R_PPC64_REL24,
                SymbolRef::Global(*symbol),
                0,
            ));
            relocations.push(rel(
                index as u64 * 8 + 4,
                object::elf::R_PPC64_GOT16_DS,
                SymbolRef::Global(*symbol),
                0,
            ));
        }
        session
            .add_object(InputObject {
                name: "many.o".to_owned(),
                sections: vec![text_section(&words, relocations)],
                local_symbols: Vec::new(),
                attributes: Default::default(),
            })
            .unwrap();
        let artifacts = session.link().unwrap();
        (
            session.got.entries().iter().map(|e| e.offset).collect::<Vec<_>>(),
            artifacts.got_bytes,
            artifacts.stub_bytes,
            artifacts.dynamic_relocations,
        )
    };

    assert_eq!(build_and_link(), build_and_link());
}

/// Re-running the relaxation driver on a converged session produces the
/// same stub table sizes.
#[test]
fn relaxation_is_a_fixpoint() {
    let mut session = LinkSession::<Ppc64>::new(SessionOptions {
        output_kind: OutputKind::DynamicExecutable,
        ..Default::default()
    });
    let callee = session.add_symbol(GlobalSymbol {
        name: "callee".to_owned(),
        definition: None,
        absolute_value: 0,
        st_other: 0,
        flags: ValueFlags::DYNAMIC | ValueFlags::FUNCTION,
    });
    session
        .add_object(InputObject {
            name: "a.o".to_owned(),
            sections: vec![text_section(
                &[insn::bl(0), insn::NOP],
                vec![rel(0, object::elf::R_PPC64_REL24, SymbolRef::Global(callee), 0)],
            )],
            local_symbols: Vec::new(),
            attributes: Default::default(),
        })
        .unwrap();
    session.link().unwrap();

    let sizes: Vec<u64> = session.stub_tables.iter().map(|t| t.total_size()).collect();
    session.relax().unwrap();
    let again: Vec<u64> = session.stub_tables.iter().map(|t| t.total_size()).collect();
    assert_eq!(sizes, again);
}

/// A GOT-relative load gets one slot whose TOC offset lands in the DS
/// field.
#[test]
fn got_load_resolves_toc_relative() {
    let mut session = LinkSession::<Ppc64>::new(SessionOptions {
        output_kind: OutputKind::DynamicExecutable,
        ..Default::default()
    });
    let data = session.add_symbol(GlobalSymbol {
        name: "shared_data".to_owned(),
        definition: None,
        absolute_value: 0,
        st_other: 0,
        flags: ValueFlags::DYNAMIC,
    });
    session
        .add_object(InputObject {
            name: "got.o".to_owned(),
            sections: vec![text_section(
                &[insn::ld(4, 2, 0)],
                vec![rel(0, object::elf::R_PPC64_GOT16_DS, SymbolRef::Global(data), 0)],
            )],
            local_symbols: Vec::new(),
            attributes: Default::default(),
        })
        .unwrap();
    let artifacts = session.link().unwrap();

    assert_eq!(session.got.entries().len(), 1);
    let field = InsnField::Ds16.read(E, &session.objects[0].sections[0].bytes);
    let slot_address = session.layout.got_address;
    assert_eq!(field, slot_address.wrapping_sub(session.layout.toc_base) as i64);
    assert!(
        artifacts
            .dynamic_relocations
            .iter()
            .any(|r| r.kind == ppclink_utils::elf::DynamicRelocationKind::GotEntry)
    );
}

/// A broken TLS marker (no helper call after it) is a collected error that
/// fails the link at the end, not a silent drop or a mid-pass abort.
#[test]
fn broken_tls_marker_is_reported() {
    let mut session = LinkSession::<Ppc64>::new(static_exe_options());
    let tls_var = session.add_symbol(GlobalSymbol {
        name: "tls_var".to_owned(),
        definition: None,
        absolute_value: 0,
        st_other: 0,
        flags: ValueFlags::TLS | ValueFlags::DYNAMIC,
    });
    session
        .add_object(InputObject {
            name: "broken.o".to_owned(),
            sections: vec![text_section(
                &[insn::bl(0)],
                // Marker with no helper-call relocation following it.
                vec![rel(0, object::elf::R_PPC64_TLSGD, SymbolRef::Global(tls_var), 0)],
            )],
            local_symbols: Vec::new(),
            attributes: Default::default(),
        })
        .unwrap();

    let error = session.link().unwrap_err();
    assert!(error.to_string().contains("error"));
    assert!(
        session
            .diagnostics
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("not paired")
                || d.message.contains("no following relocation"))
    );
}
