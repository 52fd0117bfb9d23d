// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::ns_link::NsConnector;

use std::{sync::Arc, time::Duration};
use tokio::time::sleep;

/// Periodic liveness signal towards the name server.
///
/// The connector swallows beats while the name server is unknown, so a
/// heart can start before the first probe arrived.
pub struct Heart {
    ns: Arc<dyn NsConnector>,
    interval: Duration,
}

impl Heart {
    pub fn new(ns: Arc<dyn NsConnector>, interval: Duration) -> Self {
        Self { ns, interval }
    }

    /// Beats until the task is dropped.
    pub async fn run(self) {
        loop {
            self.contract().await;
        }
    }

    /// Makes `count` consecutive beats. Used by tests.
    pub async fn poll_n(&self, count: usize) {
        for _ in 0..count {
            self.contract().await;
        }
    }

    async fn contract(&self) {
        self.ns.pulse();
        sleep(self.interval).await;
    }
}
