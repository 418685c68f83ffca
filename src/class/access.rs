use bitflags::bitflags;

bitflags! {
    /// Access flags shared by classes, fields and methods.
    ///
    /// Several JVM flags reuse the same bit depending on what they qualify; those aliases are
    /// exposed as associated constants below rather than as separate named flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

impl AccessFlags {
    pub const SUPER: AccessFlags = AccessFlags::SYNCHRONIZED;
    pub const BRIDGE: AccessFlags = AccessFlags::VOLATILE;
    pub const VARARGS: AccessFlags = AccessFlags::TRANSIENT;

    /// Maps a Java source modifier keyword to its method flag.
    pub fn from_modifier(keyword: &str) -> Option<AccessFlags> {
        Some(match keyword {
            "public" => AccessFlags::PUBLIC,
            "protected" => AccessFlags::PROTECTED,
            "private" => AccessFlags::PRIVATE,
            "static" => AccessFlags::STATIC,
            "final" => AccessFlags::FINAL,
            "synchronized" => AccessFlags::SYNCHRONIZED,
            "native" => AccessFlags::NATIVE,
            "abstract" => AccessFlags::ABSTRACT,
            "strictfp" => AccessFlags::STRICT,
            _ => return None,
        })
    }

    pub fn is_static(&self) -> bool {
        self.contains(AccessFlags::STATIC)
    }

    pub fn is_private(&self) -> bool {
        self.contains(AccessFlags::PRIVATE)
    }

    pub fn is_interface(&self) -> bool {
        self.contains(AccessFlags::INTERFACE)
    }
}
