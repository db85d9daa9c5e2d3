// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sky coordinates as they appear in archive headers: sexagesimal RA in
//! hourangle, sexagesimal Dec in degrees.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Could not parse '{0}' as a sexagesimal coordinate")]
    Unparseable(String),

    #[error("Right ascension '{0}' is out of range")]
    RaOutOfRange(String),

    #[error("Declination '{0}' is out of range")]
    DecOutOfRange(String),
}

/// An equatorial sky position. Both coordinates are in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RADec {
    /// Right ascension \[radians\].
    pub ra: f64,
    /// Declination \[radians\].
    pub dec: f64,
}

impl RADec {
    pub fn from_radians(ra: f64, dec: f64) -> RADec {
        RADec { ra, dec }
    }

    /// Parse header-style strings, e.g. RA "14:45:16.465" (hours) and Dec
    /// "+09:58:35.9" (degrees).
    pub fn from_sexagesimal(ra: &str, dec: &str) -> Result<RADec, CoordError> {
        let ra_hours = parse_sexagesimal(ra)?;
        if !(0.0..24.0).contains(&ra_hours) {
            return Err(CoordError::RaOutOfRange(ra.to_string()));
        }
        let dec_deg = parse_sexagesimal(dec)?;
        if !(-90.0..=90.0).contains(&dec_deg) {
            return Err(CoordError::DecOutOfRange(dec.to_string()));
        }
        Ok(RADec {
            ra: ra_hours * 15.0_f64.to_radians(),
            dec: dec_deg.to_radians(),
        })
    }

    /// The angular separation between two positions \[radians\], via the
    /// haversine formula.
    pub fn separation(&self, other: &RADec) -> f64 {
        let d_dec = other.dec - self.dec;
        let d_ra = other.ra - self.ra;
        let a = (d_dec / 2.0).sin().powi(2)
            + self.dec.cos() * other.dec.cos() * (d_ra / 2.0).sin().powi(2);
        2.0 * a.sqrt().asin()
    }

    /// The angular separation between two positions \[arcminutes\].
    pub fn separation_arcmin(&self, other: &RADec) -> f64 {
        self.separation(other).to_degrees() * 60.0
    }
}

/// Parse "±A:B:C.C" into A + B/60 + C/3600, carrying the sign of the leading
/// field across all of them.
fn parse_sexagesimal(s: &str) -> Result<f64, CoordError> {
    let trimmed = s.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let mut value = 0.0;
    let mut scale = 1.0;
    let mut fields = 0;
    for field in unsigned.split(':') {
        let parsed: f64 = field
            .trim()
            .parse()
            .map_err(|_| CoordError::Unparseable(s.to_string()))?;
        if parsed < 0.0 {
            return Err(CoordError::Unparseable(s.to_string()));
        }
        value += parsed / scale;
        scale *= 60.0;
        fields += 1;
    }
    if fields == 0 || fields > 3 {
        return Err(CoordError::Unparseable(s.to_string()));
    }
    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn parse_header_strings() {
        let pos = RADec::from_sexagesimal("14:45:16.465", "+09:58:36.0").unwrap();
        assert_abs_diff_eq!(
            pos.ra.to_degrees(),
            (14.0 + 45.0 / 60.0 + 16.465 / 3600.0) * 15.0,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            pos.dec.to_degrees(),
            9.0 + 58.0 / 60.0 + 36.0 / 3600.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn negative_dec_carries_through_fields() {
        let pos = RADec::from_sexagesimal("00:00:00", "-00:30:00").unwrap();
        assert_abs_diff_eq!(pos.dec.to_degrees(), -0.5, epsilon = 1e-9);
    }

    #[test]
    fn bad_strings_are_rejected() {
        assert!(RADec::from_sexagesimal("potato", "0:0:0").is_err());
        assert!(RADec::from_sexagesimal("25:00:00", "0:0:0").is_err());
        assert!(RADec::from_sexagesimal("0:0:0", "95:00:00").is_err());
    }

    #[test]
    fn separation_of_identical_positions_is_zero() {
        let pos = RADec::from_sexagesimal("12:30:00", "-45:00:00").unwrap();
        assert_abs_diff_eq!(pos.separation(&pos), 0.0);
    }

    #[test]
    fn separation_one_arcmin_in_dec() {
        let a = RADec::from_sexagesimal("06:00:00", "10:00:00").unwrap();
        let b = RADec::from_sexagesimal("06:00:00", "10:01:00").unwrap();
        assert_abs_diff_eq!(a.separation_arcmin(&b), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn ra_separation_shrinks_with_dec() {
        // One minute of RA is 15 arcmin on the equator but much less at high
        // declination.
        let a = RADec::from_sexagesimal("06:00:00", "00:00:00").unwrap();
        let b = RADec::from_sexagesimal("06:01:00", "00:00:00").unwrap();
        assert_abs_diff_eq!(a.separation_arcmin(&b), 15.0, epsilon = 1e-3);

        let c = RADec::from_sexagesimal("06:00:00", "80:00:00").unwrap();
        let d = RADec::from_sexagesimal("06:01:00", "80:00:00").unwrap();
        assert!(c.separation_arcmin(&d) < 3.0);
    }
}
