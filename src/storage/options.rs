// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

use crate::vector::DEFAULT_VECTOR_CAPACITY;

use super::{StorageError, StorageResult, MAX_ROW_GROUP_SIZE};

/// Tunables of the storage engine.
#[derive(Clone, Debug)]
pub struct StorageOptions {
    /// Size of one buffer-pool block. Column segments never exceed it.
    pub block_size: usize,
    /// Row capacity of one row group; must be a multiple of the vector
    /// capacity.
    pub row_group_size: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            block_size: 256 * 1024,
            row_group_size: 120 * DEFAULT_VECTOR_CAPACITY as u64,
        }
    }
}

impl StorageOptions {
    pub fn validate(&self) -> StorageResult<()> {
        if self.row_group_size == 0
            || self.row_group_size % DEFAULT_VECTOR_CAPACITY as u64 != 0
            || self.row_group_size > MAX_ROW_GROUP_SIZE
        {
            return Err(StorageError::invalid_state(format!(
                "row group size {} must be a non-zero multiple of {} and at most {}",
                self.row_group_size, DEFAULT_VECTOR_CAPACITY, MAX_ROW_GROUP_SIZE
            )));
        }
        if self.block_size < DEFAULT_VECTOR_CAPACITY {
            return Err(StorageError::invalid_state(format!(
                "block size {} is too small",
                self.block_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        StorageOptions::default().validate().unwrap();
    }

    #[test]
    fn rejects_unaligned_row_group_size() {
        let options = StorageOptions {
            row_group_size: 1000,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
