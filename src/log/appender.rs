// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::path::Path;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling,
};

/// Builds a non-blocking daily-rolling file writer under `log_dir`.
/// The returned guard must be held for the life of the program.
pub(super) fn file_rotater(log_dir: &Path) -> (NonBlocking, WorkerGuard) {
    let appender = rolling::daily(log_dir, "kumofs.log");
    tracing_appender::non_blocking(appender)
}
