//! Merging of the per-object ABI convention attributes (floating point,
//! vector, struct return). Conflicts between regular objects are fatal
//! unless warning-only mode was requested; conflicts with shared-object
//! metadata only ever warn, since the convention mismatch may be confined
//! to symbols the link never references.

use crate::arch::AbiVersion;
use crate::arch::PowerPcArch;
use crate::args::AttributeMismatchPolicy;
use crate::diagnostics::DiagnosticKind;
use crate::diagnostics::DiagnosticSink;
use crate::error::Result;
use crate::model::AbiAttributes;
use anyhow::bail;

fn describe_fp(value: u32) -> &'static str {
    match value {
        1 => "hard-float double",
        2 => "soft-float",
        3 => "hard-float single",
        _ => "unspecified",
    }
}

pub(crate) fn merge<A: PowerPcArch>(
    merged: &mut AbiAttributes,
    incoming: &AbiAttributes,
    source_name: &str,
    from_shared_object: bool,
    policy: AttributeMismatchPolicy,
    diagnostics: &mut DiagnosticSink,
) -> Result {
    // The 64-bit ABIs fix the calling convention; the attribute words only
    // steer the 32-bit SysV ABI, so no mismatch there is interesting.
    if A::ABI != AbiVersion::Ppc32 {
        return Ok(());
    }

    for (name, merged_value, incoming_value) in [
        ("floating point", &mut merged.fp, incoming.fp),
        ("vector", &mut merged.vector, incoming.vector),
        ("struct return", &mut merged.struct_return, incoming.struct_return),
    ] {
        if incoming_value == 0 {
            continue;
        }
        if *merged_value == 0 {
            *merged_value = incoming_value;
            continue;
        }
        if *merged_value == incoming_value {
            continue;
        }
        let message = if name == "floating point" {
            format!(
                "{source_name} uses {} while earlier objects use {} ({name} ABI mismatch)",
                describe_fp(incoming_value),
                describe_fp(*merged_value),
            )
        } else {
            format!(
                "{source_name} declares {name} ABI {incoming_value}, earlier objects declare {}",
                *merged_value
            )
        };
        if from_shared_object || policy == AttributeMismatchPolicy::WarnOnly {
            diagnostics.warn(DiagnosticKind::AbiAttributeMismatch, message);
        } else {
            bail!("{message}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Ppc32;
    use crate::arch::Ppc64;

    fn fp(value: u32) -> AbiAttributes {
        AbiAttributes {
            fp: value,
            ..Default::default()
        }
    }

    #[test]
    fn test_regular_object_conflict_is_fatal() {
        let mut merged = AbiAttributes::default();
        let mut sink = DiagnosticSink::new();
        merge::<Ppc32>(
            &mut merged,
            &fp(1),
            "a.o",
            false,
            AttributeMismatchPolicy::Strict,
            &mut sink,
        )
        .unwrap();
        let err = merge::<Ppc32>(
            &mut merged,
            &fp(2),
            "b.o",
            false,
            AttributeMismatchPolicy::Strict,
            &mut sink,
        )
        .unwrap_err();
        assert!(err.to_string().contains("soft-float"));
    }

    #[test]
    fn test_shared_object_conflict_warns() {
        let mut merged = fp(1);
        let mut sink = DiagnosticSink::new();
        merge::<Ppc32>(
            &mut merged,
            &fp(2),
            "libc.so",
            true,
            AttributeMismatchPolicy::Strict,
            &mut sink,
        )
        .unwrap();
        assert_eq!(sink.diagnostics().len(), 1);
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_warn_only_policy() {
        let mut merged = fp(1);
        let mut sink = DiagnosticSink::new();
        merge::<Ppc32>(
            &mut merged,
            &fp(3),
            "b.o",
            false,
            AttributeMismatchPolicy::WarnOnly,
            &mut sink,
        )
        .unwrap();
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_unset_adopts_incoming() {
        let mut merged = AbiAttributes::default();
        let mut sink = DiagnosticSink::new();
        merge::<Ppc32>(
            &mut merged,
            &fp(2),
            "a.o",
            false,
            AttributeMismatchPolicy::Strict,
            &mut sink,
        )
        .unwrap();
        assert_eq!(merged.fp, 2);
    }

    #[test]
    fn test_64_bit_ignores_attribute_words() {
        let mut merged = fp(1);
        let mut sink = DiagnosticSink::new();
        merge::<Ppc64>(
            &mut merged,
            &fp(2),
            "b.o",
            false,
            AttributeMismatchPolicy::Strict,
            &mut sink,
        )
        .unwrap();
        assert_eq!(merged.fp, 1);
    }
}
