//! Link-session configuration handed to the backend by the generic linker
//! core. This mirrors the command-line surface that controls the PowerPC
//! backend without depending on how the host parses its arguments.

use crate::error::Result;
use anyhow::bail;
use ppclink_utils::powerpc64::DEFAULT_GROUP_SIZE;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    StaticExecutable,
    DynamicExecutable,
    PositionIndependentExecutable,
    SharedObject,
}

impl OutputKind {
    #[must_use]
    pub fn is_executable(self) -> bool {
        self != OutputKind::SharedObject
    }

    #[must_use]
    pub fn is_static_executable(self) -> bool {
        self == OutputKind::StaticExecutable
    }

    #[must_use]
    pub fn is_relocatable(self) -> bool {
        matches!(
            self,
            OutputKind::PositionIndependentExecutable | OutputKind::SharedObject
        )
    }
}

/// Whether PLT call and long-branch stubs may use POWER10 prefixed
/// pc-relative instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Power10Stubs {
    /// Use prefixed forms only when the input objects already use
    /// pc-relative addressing.
    #[default]
    Auto,
    Yes,
    No,
}

impl FromStr for Power10Stubs {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Power10Stubs::Auto),
            "yes" => Ok(Power10Stubs::Yes),
            "no" => Ok(Power10Stubs::No),
            other => bail!("--power10-stubs={other} is not supported"),
        }
    }
}

/// How conflicting ABI attributes between input objects are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeMismatchPolicy {
    /// Fatal for regular objects, warning when merging shared-object
    /// metadata.
    #[default]
    Strict,
    WarnOnly,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub output_kind: OutputKind,

    /// Maximum address span of one stub group in bytes. Negative means
    /// stubs must be placed after the branches that use them; positive
    /// allows branches after their stub table too.
    pub group_size: i64,

    pub power10_stubs: Power10Stubs,

    /// Guard PLT call stubs against reading a torn entry while the runtime
    /// linker is resolving it on another thread.
    pub plt_thread_safe: bool,

    /// Downgrade TLS access sequences when link-time information permits.
    pub tls_optimize: bool,

    /// Shorten TOC-relative accesses whose offset fits the immediate field.
    pub toc_optimize: bool,

    pub attribute_policy: AttributeMismatchPolicy,

    /// Base address of the first executable output section.
    pub image_base: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            output_kind: OutputKind::StaticExecutable,
            group_size: DEFAULT_GROUP_SIZE,
            power10_stubs: Power10Stubs::default(),
            plt_thread_safe: false,
            tls_optimize: true,
            toc_optimize: true,
            attribute_policy: AttributeMismatchPolicy::default(),
            image_base: 0x1000_0000,
        }
    }
}

impl SessionOptions {
    /// The group span limit with the placement sign stripped.
    #[must_use]
    pub fn group_span(&self) -> u64 {
        self.group_size.unsigned_abs()
    }

    #[must_use]
    pub fn stubs_always_after_branches(&self) -> bool {
        self.group_size < 0
    }

    /// Parses a `--stub-group-size`-style argument.
    pub fn parse_group_size(&mut self, s: &str) -> Result {
        let value: i64 = s
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid stub group size: {s}"))?;
        if value == 0 {
            self.group_size = DEFAULT_GROUP_SIZE;
        } else {
            self.group_size = value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power10_stubs_from_str() {
        assert_eq!("auto".parse::<Power10Stubs>().unwrap(), Power10Stubs::Auto);
        assert_eq!("yes".parse::<Power10Stubs>().unwrap(), Power10Stubs::Yes);
        assert!("maybe".parse::<Power10Stubs>().is_err());
    }

    #[test]
    fn test_group_size_sign() {
        let mut options = SessionOptions::default();
        options.parse_group_size("-65536").unwrap();
        assert_eq!(options.group_span(), 65536);
        assert!(options.stubs_always_after_branches());
        options.parse_group_size("0").unwrap();
        assert_eq!(options.group_size, DEFAULT_GROUP_SIZE);
    }
}
