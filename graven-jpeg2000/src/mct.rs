//! Inverse multiple component transforms (ITU-T T.800 Annex G).
//!
//! When the COD marker flags a component transform, the first three
//! components carry decorrelated data: the reversible color transform
//! (RCT) with the 5-3 filter, the irreversible one (ICT, a YCbCr
//! variant) with the 9-7 filter.

/// The inverse RCT (G-6 to G-8), in place over the first three
/// component planes.
pub(crate) fn inverse_reversible(c0: &mut [f32], c1: &mut [f32], c2: &mut [f32]) {
    for ((y0, y1), y2) in c0.iter_mut().zip(c1.iter_mut()).zip(c2.iter_mut()) {
        let g = *y0 - ((*y2 + *y1) / 4.0).floor();
        let r = g + *y2;
        let b = g + *y1;
        (*y0, *y1, *y2) = (r, g, b);
    }
}

/// The inverse ICT (G-11), in place over the first three component
/// planes.
pub(crate) fn inverse_irreversible(c0: &mut [f32], c1: &mut [f32], c2: &mut [f32]) {
    for ((y0, y1), y2) in c0.iter_mut().zip(c1.iter_mut()).zip(c2.iter_mut()) {
        let r = *y0 + 1.402 * *y2;
        let g = *y0 - 0.344_13 * *y1 - 0.714_14 * *y2;
        let b = *y0 + 1.772 * *y1;
        (*y0, *y1, *y2) = (r, g, b);
    }
}

#[cfg(test)]
mod tests {
    use super::{inverse_irreversible, inverse_reversible};

    #[test]
    fn reversible_transform_inverts_the_forward_one() {
        // Forward RCT of (r, g, b) = (10, 20, 30).
        let mut c0 = vec![20.0];
        let mut c1 = vec![10.0];
        let mut c2 = vec![-10.0];

        inverse_reversible(&mut c0, &mut c1, &mut c2);

        assert_eq!((c0[0], c1[0], c2[0]), (10.0, 20.0, 30.0));
    }

    #[test]
    fn irreversible_gray_stays_gray() {
        let mut c0 = vec![128.0];
        let mut c1 = vec![0.0];
        let mut c2 = vec![0.0];

        inverse_irreversible(&mut c0, &mut c1, &mut c2);

        assert_eq!((c0[0], c1[0], c2[0]), (128.0, 128.0, 128.0));
    }

    #[test]
    fn irreversible_transform_matches_the_reference_matrix() {
        let mut c0 = vec![100.0];
        let mut c1 = vec![-20.0];
        let mut c2 = vec![30.0];

        inverse_irreversible(&mut c0, &mut c1, &mut c2);

        assert!((c0[0] - 142.06).abs() < 1e-3);
        assert!((c1[0] - 85.4584).abs() < 1e-3);
        assert!((c2[0] - 64.56).abs() < 1e-3);
    }
}
