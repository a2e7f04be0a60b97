pub mod artifact;
pub mod attendance;
pub mod embedding_store;
pub mod roster;

pub use attendance::{
    AttendanceRecord, AttendanceSink, InsertOutcome, JsonlAttendanceLedger, MemoryAttendanceSink,
    VerificationMethod,
};
pub use embedding_store::{
    EmbeddingIndex, EmbeddingSnapshot, EmbeddingStore, EnrollmentRating, IdentityKey, IdentityStatus,
    StoreSummary,
};
pub use roster::{JsonRoster, Roster, RosterEntry};
