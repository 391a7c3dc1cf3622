//! TLS access-model optimization. The decision for a recognized
//! arg-setup/helper-call sequence is computed once and cached; the
//! classifier consults it to avoid allocating GOT slots the downgraded
//! sequence no longer needs, and the relocation applier replays the exact
//! same decision when rewriting both instructions. Recomputing at each site
//! independently could let the two instructions of one sequence disagree.

use ahash::AHashMap;

use crate::model::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsModel {
    GeneralDynamic,
    LocalDynamic,
    InitialExec,
    LocalExec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsDowngrade {
    Keep,
    ToInitialExec,
    ToLocalExec,
}

/// Pure decision function. `is_final_value_known` means the thread-pointer
/// offset of the accessed variable is fixed at link time (defined in this
/// link, not interposable); `is_position_independent` means we're producing
/// a shared object whose module ID is unknown until load.
#[must_use]
pub fn optimize(
    model: TlsModel,
    is_final_value_known: bool,
    is_position_independent: bool,
) -> TlsDowngrade {
    if is_position_independent {
        return TlsDowngrade::Keep;
    }
    match model {
        TlsModel::GeneralDynamic => {
            if is_final_value_known {
                TlsDowngrade::ToLocalExec
            } else {
                TlsDowngrade::ToInitialExec
            }
        }
        // Local-dynamic accesses are module-local by construction, so in an
        // executable the module is the one being linked.
        TlsModel::LocalDynamic => TlsDowngrade::ToLocalExec,
        TlsModel::InitialExec => {
            if is_final_value_known {
                TlsDowngrade::ToLocalExec
            } else {
                TlsDowngrade::Keep
            }
        }
        TlsModel::LocalExec => TlsDowngrade::Keep,
    }
}

/// Identifies one recognized access sequence by its arg-setup site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub object: ObjectId,
    pub section: usize,
    pub offset: u64,
}

#[derive(Debug)]
pub struct TlsOptimizer {
    enabled: bool,
    is_position_independent: bool,
    cache: AHashMap<SequenceKey, TlsDowngrade>,
}

impl TlsOptimizer {
    #[must_use]
    pub fn new(enabled: bool, is_position_independent: bool) -> Self {
        Self {
            enabled,
            is_position_independent,
            cache: AHashMap::new(),
        }
    }

    /// The decision for a sequence, computed on first call and replayed
    /// verbatim afterwards.
    pub fn decide(
        &mut self,
        key: SequenceKey,
        model: TlsModel,
        is_final_value_known: bool,
    ) -> TlsDowngrade {
        if !self.enabled {
            return TlsDowngrade::Keep;
        }
        let is_position_independent = self.is_position_independent;
        *self
            .cache
            .entry(key)
            .or_insert_with(|| optimize(model, is_final_value_known, is_position_independent))
    }

    /// The cached decision, for the apply pass. A sequence the classifier
    /// never saw keeps its original model.
    #[must_use]
    pub fn decision_for(&self, key: SequenceKey) -> TlsDowngrade {
        self.cache.get(&key).copied().unwrap_or(TlsDowngrade::Keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TlsModel::GeneralDynamic, true, false, TlsDowngrade::ToLocalExec)]
    #[case(TlsModel::GeneralDynamic, false, false, TlsDowngrade::ToInitialExec)]
    #[case(TlsModel::GeneralDynamic, true, true, TlsDowngrade::Keep)]
    #[case(TlsModel::LocalDynamic, false, false, TlsDowngrade::ToLocalExec)]
    #[case(TlsModel::InitialExec, true, false, TlsDowngrade::ToLocalExec)]
    #[case(TlsModel::InitialExec, false, false, TlsDowngrade::Keep)]
    #[case(TlsModel::LocalExec, true, false, TlsDowngrade::Keep)]
    fn test_optimize(
        #[case] model: TlsModel,
        #[case] known: bool,
        #[case] pie: bool,
        #[case] expected: TlsDowngrade,
    ) {
        assert_eq!(optimize(model, known, pie), expected);
    }

    #[test]
    fn test_decision_is_cached() {
        let mut optimizer = TlsOptimizer::new(true, false);
        let key = SequenceKey {
            object: ObjectId(0),
            section: 1,
            offset: 0x10,
        };
        let first = optimizer.decide(key, TlsModel::GeneralDynamic, true);
        // Even with different inputs, the cached decision wins: both
        // instructions of the sequence must agree.
        let second = optimizer.decide(key, TlsModel::GeneralDynamic, false);
        assert_eq!(first, second);
        assert_eq!(optimizer.decision_for(key), first);
    }

    #[test]
    fn test_disabled_optimizer_keeps_everything() {
        let mut optimizer = TlsOptimizer::new(false, false);
        let key = SequenceKey {
            object: ObjectId(0),
            section: 0,
            offset: 0,
        };
        assert_eq!(
            optimizer.decide(key, TlsModel::GeneralDynamic, true),
            TlsDowngrade::Keep
        );
    }
}
