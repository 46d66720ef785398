/// Source of task ids for `OfficeManagerPool::submit`
pub trait IdProvider: Send + Sync {
    fn generate_id(&self) -> String;
}

/// Random UUID v4 ids
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
