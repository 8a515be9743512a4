/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// SMALLINT discriminant used for enumerations persisted in the database.
pub type SmallId = i16;
