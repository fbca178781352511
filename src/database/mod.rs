// Database module
// Dual storage: SQLite for the question/answer ledger, LanceDB for question vectors

pub mod lancedb;
pub mod sqlite;

pub use self::lancedb::{IndexedVector, Neighbor, VectorIndex};
pub use sqlite::{Ledger, QuestionRecord};
