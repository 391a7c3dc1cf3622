use bitflags::bitflags;

bitflags! {
    /// Attributes of a symbol consulted by the relocation classifier. Some
    /// of this comes from the object that defined the symbol and some is
    /// computed based on what kinds of references we encounter to it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ValueFlags: u16 {
        /// An absolute value that won't change depending on load address.
        /// This includes undefined weak symbols, which resolve to 0.
        const ABSOLUTE = 1 << 0;

        /// The value is from a shared (dynamic) object, so although it may
        /// have an address, it won't be known until runtime.
        const DYNAMIC = 1 << 1;

        /// The value refers to an ifunc. The actual address won't be known
        /// until runtime; references must go via PLT dispatch code.
        const IFUNC = 1 << 2;

        /// The definition of the symbol is final and cannot be overridden at
        /// runtime.
        const NON_INTERPOSABLE = 1 << 3;

        /// Set when the value is a function.
        const FUNCTION = 1 << 4;

        /// The symbol is undefined everywhere. References resolve to zero
        /// on a best-effort basis and branch sites get catalogued anyway so
        /// that diagnostics carry an address.
        const UNDEFINED = 1 << 5;

        /// The symbol lives in TLS storage.
        const TLS = 1 << 6;
    }
}

impl ValueFlags {
    #[must_use]
    pub fn is_ifunc(self) -> bool {
        self.contains(ValueFlags::IFUNC)
    }

    #[must_use]
    pub fn is_dynamic(self) -> bool {
        self.contains(ValueFlags::DYNAMIC)
    }

    #[must_use]
    pub fn is_interposable(self) -> bool {
        !self.contains(ValueFlags::NON_INTERPOSABLE)
    }

    #[must_use]
    pub fn is_function(self) -> bool {
        self.contains(ValueFlags::FUNCTION)
    }

    #[must_use]
    pub fn is_absolute(self) -> bool {
        self.contains(ValueFlags::ABSOLUTE)
    }

    #[must_use]
    pub fn is_undefined(self) -> bool {
        self.contains(ValueFlags::UNDEFINED)
    }

    #[must_use]
    pub fn is_tls(self) -> bool {
        self.contains(ValueFlags::TLS)
    }

    /// Returns whether the value will have an address that is known at link
    /// time, as opposed to runtime-resolved or absolute values.
    #[must_use]
    pub fn is_address(self) -> bool {
        !self.contains(ValueFlags::IFUNC)
            && !self.contains(ValueFlags::DYNAMIC)
            && !self.contains(ValueFlags::ABSOLUTE)
    }
}

impl std::fmt::Display for ValueFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}
