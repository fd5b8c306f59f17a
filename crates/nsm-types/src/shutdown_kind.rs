/// A bit set over `{Normal, Fast, Parallel, RunUp}`, matching the external
/// contract's layout (`Normal=0x01`, `Fast=0x02`, `Parallel=0x04`,
/// `RunUp=0x08`). `RunUp` and a shutdown kind are mutually exclusive in a
/// single notification; `Parallel` is a modifier combinable with either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ShutdownKind(u32);

impl ShutdownKind {
    pub const NOT: ShutdownKind = ShutdownKind(0x00);
    pub const NORMAL: ShutdownKind = ShutdownKind(0x01);
    pub const FAST: ShutdownKind = ShutdownKind(0x02);
    pub const PARALLEL: ShutdownKind = ShutdownKind(0x04);
    pub const RUN_UP: ShutdownKind = ShutdownKind(0x08);

    /// Builds a kind from a raw bit set, as registered by a client over the
    /// wire (clients register a bitwise-OR of the constants above).
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        ShutdownKind(bits & 0x0f)
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn union(self, other: ShutdownKind) -> ShutdownKind {
        ShutdownKind(self.0 | other.0)
    }

    #[must_use]
    pub fn difference(self, other: ShutdownKind) -> ShutdownKind {
        ShutdownKind(self.0 & !other.0)
    }

    /// Explicit, single-bit membership check. Every classification in this
    /// crate goes through this method rather than ad hoc `&` expressions,
    /// so that "is this kind present" can never be confused with "replace
    /// with this kind" (a bug present in the upstream source this crate is
    /// modeled on, which occasionally used OR where AND was intended).
    #[must_use]
    pub fn contains(self, bit: ShutdownKind) -> bool {
        debug_assert!(
            bit.0.count_ones() == 1,
            "contains() expects a single-bit kind"
        );
        self.0 & bit.0 == bit.0
    }

    #[must_use]
    pub fn is_parallel(self) -> bool {
        self.contains(ShutdownKind::PARALLEL)
    }

    #[must_use]
    pub fn is_run_up(self) -> bool {
        self.contains(ShutdownKind::RUN_UP)
    }

    #[must_use]
    pub fn is_fast(self) -> bool {
        self.contains(ShutdownKind::FAST)
    }

    #[must_use]
    pub fn is_normal(self) -> bool {
        self.contains(ShutdownKind::NORMAL)
    }
}
