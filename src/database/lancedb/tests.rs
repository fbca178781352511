use super::*;

#[test]
fn indexed_vector_creation() {
    let record = IndexedVector::new("abc123", vec![0.1, 0.2, 0.3]);

    assert_eq!(record.id, "abc123");
    assert_eq!(record.vector.len(), 3);
    assert!(chrono::DateTime::parse_from_rfc3339(&record.created_at).is_ok());
}

#[test]
fn indexed_vector_serialization() {
    let record = IndexedVector {
        id: "abc123".to_string(),
        vector: vec![0.5, -0.5],
        created_at: "2024-01-01T00:00:00Z".to_string(),
    };

    let json = serde_json::to_string(&record).expect("should serialize");
    let parsed: IndexedVector = serde_json::from_str(&json).expect("should deserialize");
    assert_eq!(parsed, record);
}
