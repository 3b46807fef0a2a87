use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Reserve on a missing or non-AVAILABLE slot.
    SlotUnavailable(Ulid),
    /// Check-in/check-out/cancel refused. Deliberately does not say whether
    /// the booking is missing, owned by someone else, or in the wrong state.
    InvalidBooking(Ulid),
    DuplicateSlotNumber { lot_id: Ulid, number: u32 },
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotUnavailable(id) => write!(f, "slot not available: {id}"),
            EngineError::InvalidBooking(id) => write!(f, "invalid booking: {id}"),
            EngineError::DuplicateSlotNumber { lot_id, number } => {
                write!(f, "lot {lot_id} already has slot number {number}")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
