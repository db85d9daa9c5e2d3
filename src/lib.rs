// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Processing for folded pulsar observations: template construction, RFI
excision and flux calibration.
 */

pub mod archive;
pub mod catalogue;
pub mod checkpoint;
pub mod coord;
pub mod excision;
pub mod fluxcal;
pub mod pol;
pub mod profile;
pub mod stats;
pub mod template;

mod cli;
pub use cli::{Psrflux, PsrfluxError};

use crossbeam_utils::atomic::AtomicCell;
use lazy_static::lazy_static;

lazy_static! {
    /// Are progress bars being drawn? The CLI sets this once at startup.
    pub(crate) static ref PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
}
