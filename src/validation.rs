use crate::error::StorageError;

/// Checks that a group id can be used as a storage key component.
pub fn validate_group_id(group: &str) -> Result<(), StorageError> {
    if group.is_empty() {
        return Err(StorageError::InvalidGroup(
            "group id cannot be empty".to_string(),
        ));
    }

    if group.chars().any(char::is_control) {
        return Err(StorageError::InvalidGroup(format!(
            "group id {:?} contains control characters",
            group
        )));
    }

    Ok(())
}
