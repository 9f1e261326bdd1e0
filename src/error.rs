use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardError {
    ThreadSlotsExhausted,
    HandleAlreadyAcquired,
    AllocationFailed,
}

impl HazardError {
    pub fn as_str(self) -> &'static str {
        match self {
            HazardError::ThreadSlotsExhausted => {
                "more distinct threads than the domain has slots for"
            }
            HazardError::HandleAlreadyAcquired => {
                "thread already holds an unreleased version handle"
            }
            HazardError::AllocationFailed => "failed to allocate epoch record storage",
        }
    }
}

impl fmt::Display for HazardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for HazardError {}

pub type HazardResult<T> = Result<T, HazardError>;
