/// Where model weights should be placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl DeviceMap {
    pub fn new(force_cpu: bool, ordinal: usize) -> Self {
        if force_cpu {
            Self::ForceCpu
        } else {
            Self::Ordinal(ordinal)
        }
    }
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}
