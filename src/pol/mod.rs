// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Polarization-basis transforms between coherence (AA, BB, CR, CI) and
//! Stokes (I, Q, U, V) products.


use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolError {
    #[error("Unrecognised polarization type '{0}'; expected AABBCRCI or IQUV")]
    UnknownBasis(String),

    #[error("Unrecognised feed polarization '{0}'; expected LIN or CIRC")]
    UnknownFeed(String),

    #[error("Polarization conversion needs 4 products, but the data has {0}")]
    NotFourProducts(usize),
}

/// The polarization basis of archive data, as named by the POL_TYPE header.
#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolBasis {
    #[strum(serialize = "AABBCRCI")]
    Coherence,

    #[strum(serialize = "IQUV")]
    Stokes,
}

/// The feed handedness, as named by the FD_POLN header.
#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feed {
    #[strum(serialize = "LIN")]
    Linear,

    #[strum(serialize = "CIRC")]
    Circular,
}

/// One sample's coherence products to Stokes products.
#[inline]
pub fn coherence_to_stokes([a, b, c, d]: [f64; 4], feed: Feed) -> [f64; 4] {
    match feed {
        Feed::Linear => [a + b, a - b, 2.0 * c, 2.0 * d],
        Feed::Circular => [a + b, 2.0 * c, 2.0 * d, a - b],
    }
}

/// One sample's Stokes products to coherence products. The exact inverse of
/// [`coherence_to_stokes`].
#[inline]
pub fn stokes_to_coherence([i, q, u, v]: [f64; 4], feed: Feed) -> [f64; 4] {
    match feed {
        Feed::Linear => [(i + q) / 2.0, (i - q) / 2.0, u / 2.0, v / 2.0],
        Feed::Circular => [(i + v) / 2.0, (i - v) / 2.0, q / 2.0, u / 2.0],
    }
}

/// Convert a [subint, pol, chan, bin] cube from one polarization basis to
/// another. An identity basis pair returns the input unchanged.
pub fn convert(
    data: ArrayView4<f64>,
    from: PolBasis,
    to: PolBasis,
    feed: Feed,
) -> Result<Array4<f64>, PolError> {
    if from == to {
        return Ok(data.to_owned());
    }
    let npol = data.len_of(Axis(1));
    if npol != 4 {
        return Err(PolError::NotFourProducts(npol));
    }

    let transform = match (from, to) {
        (PolBasis::Coherence, PolBasis::Stokes) => coherence_to_stokes,
        (PolBasis::Stokes, PolBasis::Coherence) => stokes_to_coherence,
        // Identity handled above; the enum admits no other pairs.
        _ => unreachable!(),
    };

    let mut out = Array4::zeros(data.raw_dim());
    for (subint, mut out_subint) in data.outer_iter().zip(out.outer_iter_mut()) {
        let (nchan, nbin) = (subint.len_of(Axis(1)), subint.len_of(Axis(2)));
        for i_chan in 0..nchan {
            for i_bin in 0..nbin {
                let products = [
                    subint[(0, i_chan, i_bin)],
                    subint[(1, i_chan, i_bin)],
                    subint[(2, i_chan, i_bin)],
                    subint[(3, i_chan, i_bin)],
                ];
                let converted = transform(products, feed);
                for (i_pol, value) in converted.into_iter().enumerate() {
                    out_subint[(i_pol, i_chan, i_bin)] = value;
                }
            }
        }
    }
    Ok(out)
}
