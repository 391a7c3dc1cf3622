//! The relaxation driver: an explicit bounded state machine that sizes and
//! places the stub tables until the layout stops moving. Stub encodings are
//! distance-dependent, and the stubs themselves move every section placed
//! after them, so sizing is repeated to a fixpoint. After a fixed number of
//! passes the tables switch to monotonic growth, which guarantees
//! termination when a distance oscillates around an encoding threshold.

use crate::arch::PowerPcArch;
use crate::branches::BranchReference;
use crate::diagnostics::DiagnosticKind;
use crate::error::Result;
use crate::model::symbol_view;
use crate::session::LinkSession;
use crate::stub_group;
use crate::stubs::CallStubKey;
use crate::stubs::StubFlags;
use crate::stubs::StubTable;
use ahash::AHashMap;
use anyhow::bail;
use smallvec::SmallVec;
use smallvec::smallvec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Grouping,
    Sizing,
    Converged,
    Failed,
}

/// How many times grouping may be redone with a reduced window before the
/// link is abandoned.
const MAX_GROUPING_RESTARTS: u32 = 3;

/// Sizing passes before tables switch to grow-only mode.
const MONOTONIC_AFTER_PASSES: u32 = 8;

/// Hard bound on sizing passes; hitting it means the layout never settled.
const MAX_SIZING_PASSES: u32 = 32;

#[derive(Debug, PartialEq, Eq)]
enum SizingOutcome {
    Converged,
    /// Some branch could not reach any stub table it is allowed to use: the
    /// grouping estimate undershot and must be redone with a smaller window.
    GroupingInfeasible,
}

#[tracing::instrument(skip_all, name = "Relax")]
pub(crate) fn run<A: PowerPcArch>(session: &mut LinkSession<A>) -> Result {
    let mut state = DriverState::Grouping;
    let mut restarts = 0u32;
    let mut group_span = session.options.group_span();

    loop {
        match state {
            DriverState::Grouping => {
                regroup::<A>(session, group_span);
                state = DriverState::Sizing;
            }
            DriverState::Sizing => match size_to_fixpoint(session)? {
                SizingOutcome::Converged => state = DriverState::Converged,
                SizingOutcome::GroupingInfeasible => {
                    restarts += 1;
                    if restarts > MAX_GROUPING_RESTARTS {
                        state = DriverState::Failed;
                    } else {
                        group_span = (group_span * 2 / 3).max(0x1000);
                        tracing::debug!(restarts, group_span, "regrouping with reduced window");
                        state = DriverState::Grouping;
                    }
                }
            },
            DriverState::Converged => {
                tracing::debug!(
                    tables = session.stub_tables.len(),
                    "relaxation converged"
                );
                return Ok(());
            }
            DriverState::Failed => {
                bail!(
                    "Branch stub placement did not converge after {MAX_GROUPING_RESTARTS} \
                     grouping restarts"
                );
            }
        }
    }
}

fn regroup<A: PowerPcArch>(session: &mut LinkSession<A>, group_span: u64) {
    let kind_of = |r_type: u32| A::relocation_from_raw_opt(r_type).map(|info| info.kind);
    session.groups = stub_group::group_code_sections(
        &session.objects,
        &session.code_order,
        group_span,
        &kind_of,
    );
    // Free any stub buffers from a previous grouping attempt before the
    // tables that own them go away.
    for block in session.stub_blocks.drain(..).flatten() {
        session.arena.free(block);
    }
    session.stub_tables = (0..session.groups.len()).map(StubTable::new).collect();
    session.stub_blocks = vec![None; session.groups.len()];
    session.refresh_layout();
}

fn size_to_fixpoint<A: PowerPcArch>(session: &mut LinkSession<A>) -> Result<SizingOutcome> {
    let code_index_of: AHashMap<(crate::model::ObjectId, usize), usize> = session
        .code_order
        .iter()
        .enumerate()
        .map(|(index, &key)| (key, index))
        .collect();

    for pass in 0..MAX_SIZING_PASSES {
        if pass == MONOTONIC_AFTER_PASSES {
            for table in &mut session.stub_tables {
                table.enter_monotonic_mode();
            }
        }

        let old_sizes: Vec<u64> =
            session.stub_tables.iter().map(StubTable::total_size).collect();
        let old_brlt = session.branch_lookup.size();

        let mut infeasible = false;
        replay_branches(session, &code_index_of, &mut infeasible)?;

        // Re-measure every table at its provisional address, then spill any
        // long-branch destinations that turned out to need lookup slots.
        let ctx = session.stub_context();
        for index in 0..session.stub_tables.len() {
            let base = session.layout.stub_table_addresses[index];
            session.stub_tables[index].place(base, &ctx);
        }
        for index in 0..session.stub_tables.len() {
            let table = &session.stub_tables[index];
            let spills: Vec<u64> = table
                .long_branch_stubs()
                .iter()
                .filter(|stub| {
                    stub.brlt_offset.is_none() && table.long_branch_needs_brlt(stub, &ctx)
                })
                .map(|stub| stub.destination)
                .collect();
            if spills.is_empty() {
                continue;
            }
            for destination in spills {
                let offset = session.branch_lookup.add(destination);
                let table = &mut session.stub_tables[index];
                for stub in table.long_branch_stubs_mut() {
                    if stub.destination == destination {
                        stub.brlt_offset = Some(offset);
                    }
                }
            }
        }

        let new_sizes: Vec<u64> =
            session.stub_tables.iter().map(StubTable::total_size).collect();
        let changed = new_sizes != old_sizes || session.branch_lookup.size() != old_brlt;

        // Cycle the byte buffers of resized tables through the arena so the
        // final emit pass writes into blocks of the right size.
        for index in 0..session.stub_tables.len() {
            let size = new_sizes[index] as usize;
            let needs_realloc = match session.stub_blocks[index] {
                Some(block) => session.arena.block_size(block) != size,
                None => size > 0,
            };
            if needs_realloc {
                if let Some(block) = session.stub_blocks[index].take() {
                    session.arena.free(block);
                }
                if size > 0 {
                    session.stub_blocks[index] = Some(session.arena.alloc(size));
                }
            }
        }

        session.refresh_layout();
        tracing::trace!(pass, ?new_sizes, changed, "sizing pass");

        if !changed {
            return Ok(if infeasible {
                SizingOutcome::GroupingInfeasible
            } else {
                SizingOutcome::Converged
            });
        }
    }

    bail!("Stub sizing did not converge within {MAX_SIZING_PASSES} passes");
}

/// Replays every catalogued branch reference against the stub tables,
/// creating entries and marking encoding variants as required.
fn replay_branches<A: PowerPcArch>(
    session: &mut LinkSession<A>,
    code_index_of: &AHashMap<(crate::model::ObjectId, usize), usize>,
    infeasible: &mut bool,
) -> Result {
    for index in 0..session.branches.len() {
        let reference = session.branches.references()[index].clone();
        replay_one::<A>(session, &reference, code_index_of, infeasible)?;
    }
    Ok(())
}

fn replay_one<A: PowerPcArch>(
    session: &mut LinkSession<A>,
    reference: &BranchReference,
    code_index_of: &AHashMap<(crate::model::ObjectId, usize), usize>,
    infeasible: &mut bool,
) -> Result {
    let info = A::relocation_from_raw(reference.r_type)?;
    let view = symbol_view(&session.objects, &session.symbols, reference.symbol)?;
    let Some(section_address) =
        session.layout.section_address(reference.object, reference.section)
    else {
        return Ok(());
    };
    let caller_address = section_address + reference.offset;

    let plt_slot = session.plt.lookup(reference.symbol, view.flags);
    let needs_stub = if plt_slot.is_some() {
        // A call through the PLT always goes via a stub; the branch cannot
        // target a data word.
        true
    } else {
        if view.flags.is_undefined() {
            return Ok(());
        }
        let target = branch_target::<A>(session, reference, view.st_other)?;
        let distance = target.wrapping_sub(caller_address) as i64;
        !(info.range.min..info.range.max).contains(&distance)
    };
    if !needs_stub {
        return Ok(());
    }

    // Conditional branches cannot reach a stub table placed a full group
    // away; grouping already halved the window for sections containing
    // them, and a miss below surfaces as an unreachable-branch warning.
    let Some(&code_index) = code_index_of.get(&(reference.object, reference.section)) else {
        session.diagnostics.warn(
            DiagnosticKind::UnreachableBranch,
            format!(
                "Branch at {}+0x{:x} is not in an executable section; no stub \
                 table can extend its reach",
                session.objects[reference.object.as_usize()].name,
                reference.offset,
            ),
        );
        return Ok(());
    };
    let own_group = stub_group::group_of(&session.groups, code_index)
        .expect("every executable section is grouped");

    let mut flags = StubFlags::empty();
    if A::is_notoc_branch(reference.r_type) {
        flags |= StubFlags::NOTOC;
        if session.use_p10_stubs() {
            flags |= StubFlags::P10;
        }
    } else {
        flags |= StubFlags::TOC;
        if !reference.uses_toc_save && plt_slot.is_some() {
            flags |= StubFlags::R2SAVE;
        }
    }

    // Positive group sizes allow a site to fall back to a neighbouring
    // group's table; negative sizes pin each site to its own group, whose
    // table is placed after the branches that use it.
    let mut candidate_groups: SmallVec<[usize; 3]> = smallvec![own_group];
    if !session.options.stubs_always_after_branches() {
        if own_group > 0 {
            candidate_groups.push(own_group - 1);
        }
        if own_group + 1 < session.stub_tables.len() {
            candidate_groups.push(own_group + 1);
        }
    }

    // Pick the first permitted table the site can currently reach; when
    // none qualifies, fall back to the site's own group and report the
    // grouping as infeasible so the driver retries with a smaller window.
    let group = candidate_groups
        .iter()
        .copied()
        .find(|&group| session.stub_tables[group].reaches(caller_address))
        .unwrap_or(own_group);

    let reachable = match plt_slot {
        Some((pool, plt_offset)) => session.stub_tables[group].add_call_stub(
            caller_address,
            CallStubKey {
                symbol: reference.symbol,
                addend: reference.addend,
            },
            pool,
            plt_offset,
            flags,
        ),
        None => {
            let target = branch_target::<A>(session, reference, view.st_other)?;
            session.stub_tables[group].add_long_branch_stub(caller_address, target, flags)
        }
    };
    if !reachable {
        *infeasible = true;
        tracing::debug!(
            caller_address,
            group,
            "branch cannot reach any permitted stub table"
        );
    }
    Ok(())
}

/// The address a branch reference targets directly, including the callee's
/// local entry offset when the call stays within the TOC domain.
fn branch_target<A: PowerPcArch>(
    session: &LinkSession<A>,
    reference: &BranchReference,
    st_other: u8,
) -> Result<u64> {
    let value = session
        .layout
        .symbol_value(&session.objects, &session.symbols, reference.symbol)?;
    let local_entry = if A::is_notoc_branch(reference.r_type) {
        0
    } else {
        A::local_entry_offset(st_other)?
    };
    Ok(value
        .wrapping_add(local_entry)
        .wrapping_add(reference.addend as u64))
}
