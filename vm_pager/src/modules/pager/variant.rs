use static_assertions::const_assert_eq;

/// Number of backing store strategies known at compile time
pub const VARIANT_COUNT: usize = 7;

/// Tag of a backing store strategy.
///
/// The set is closed, every variant owns at most one registered vtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Variant {
    Default = 0,
    Swap = 1,
    VNode = 2,
    Device = 3,
    Phys = 4,
    Dead = 5,
    ScatterGather = 6,
}

const_assert_eq!(Variant::ScatterGather as usize + 1, VARIANT_COUNT);

impl Variant {
    pub const ALL: [Variant; VARIANT_COUNT] = [
        Variant::Default,
        Variant::Swap,
        Variant::VNode,
        Variant::Device,
        Variant::Phys,
        Variant::Dead,
        Variant::ScatterGather,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes an untrusted numeric tag, `None` if it names no variant
    pub fn from_raw(raw: u32) -> Option<Variant> {
        Self::ALL.get(usize::try_from(raw).ok()?).copied()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Variant::Default => "default",
            Variant::Swap => "swap",
            Variant::VNode => "vnode",
            Variant::Device => "device",
            Variant::Phys => "phys",
            Variant::Dead => "dead",
            Variant::ScatterGather => "sg",
        }
    }
}

impl core::fmt::Display for Variant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
