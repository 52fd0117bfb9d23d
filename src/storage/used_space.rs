// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::info;

/// Tracking used space against the capacity the operator granted the
/// store.
#[derive(Clone, Debug)]
pub(super) struct UsedSpace {
    capacity: u64,
    used: Arc<AtomicU64>,
}

impl UsedSpace {
    /// Create new `UsedSpace` tracker.
    pub(super) fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Increases used space.
    pub(super) fn increase(&self, size: u64) {
        let _ = self.used.fetch_add(size, Ordering::Relaxed);
        let used = self.used.load(Ordering::Relaxed);
        info!("Used space: {used} of {}", self.capacity);
    }

    /// Decreases used space.
    pub(super) fn decrease(&self, size: u64) {
        let _ = self.used.fetch_sub(size, Ordering::Relaxed);
    }

    /// Whether a value of `size` bytes still fits.
    pub(super) fn can_add(&self, size: u64) -> bool {
        let used = self.used.load(Ordering::Relaxed);
        used + size <= self.capacity
    }

    /// Capacity not yet taken by committed chunks.
    pub(super) fn available(&self) -> u64 {
        let used = self.used.load(Ordering::Relaxed);
        self.capacity.saturating_sub(used)
    }
}
