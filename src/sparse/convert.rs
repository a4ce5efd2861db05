//! Free conversions between the local layouts.
//!
//! Every conversion is a structural re-encoding through
//! [`SparseMatrix::from_sparse`]: the multiset of `(row, col, value)` triples
//! is preserved exactly, duplicates included.

use super::{CooMatrix, CscMatrix, CsrMatrix, SparseMatrix};

macro_rules! impl_from_sparse {
    ($($src:ty => $dst:ty),* $(,)?) => {
        $(
            impl From<&$src> for $dst {
                fn from(m: &$src) -> Self {
                    <$dst as SparseMatrix>::from_sparse(m)
                }
            }
        )*
    };
}

impl_from_sparse! {
    CooMatrix => CsrMatrix,
    CooMatrix => CscMatrix,
    CsrMatrix => CooMatrix,
    CsrMatrix => CscMatrix,
    CscMatrix => CooMatrix,
    CscMatrix => CsrMatrix,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sorted(mut t: Vec<(usize, usize, f64)>) -> Vec<(usize, usize, f64)> {
        t.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)).then(a.2.total_cmp(&b.2)));
        t
    }

    fn triplets_strategy() -> impl Strategy<Value = Vec<(usize, usize, f64)>> {
        prop::collection::vec((0usize..8, 0usize..6, -10.0f64..10.0), 0..40)
    }

    #[test]
    fn csr_to_csc_and_back() {
        let csr = CsrMatrix::from_triplets(3, 3, &[(0, 2, 1.0), (1, 0, 2.0), (2, 2, 3.0)]);
        let csc = CscMatrix::from(&csr);
        assert_eq!(csc.col_pointers, vec![0, 1, 1, 3]);
        assert_eq!(CsrMatrix::from(&csc), csr);
    }

    proptest! {
        #[test]
        fn coo_csr_coo_round_trip(t in triplets_strategy()) {
            let coo = CooMatrix::from_triplets(8, 6, &t);
            let csr = CsrMatrix::from(&coo);
            let back = CooMatrix::from(&csr);
            prop_assert_eq!(sorted(back.triplets()), sorted(t));
        }

        #[test]
        fn coo_csc_csr_coo_round_trip(t in triplets_strategy()) {
            let coo = CooMatrix::from_triplets(8, 6, &t);
            let csc = CscMatrix::from(&coo);
            let csr = CsrMatrix::from(&csc);
            let back = CooMatrix::from(&csr);
            prop_assert_eq!(sorted(back.triplets()), sorted(t));
        }

        #[test]
        fn sorted_layouts_agree(t in triplets_strategy()) {
            let mut coo = CooMatrix::from_triplets(8, 6, &t);
            let mut csr = CsrMatrix::from(&coo);
            let mut csc = CscMatrix::from(&coo);
            coo.sort();
            csr.sort();
            csc.sort();
            let expected = sorted(coo.triplets());
            prop_assert_eq!(sorted(csr.triplets()), expected.clone());
            prop_assert_eq!(sorted(csc.triplets()), expected);
        }

        #[test]
        fn sort_is_idempotent(t in triplets_strategy()) {
            let mut coo = CooMatrix::from_triplets(8, 6, &t);
            let mut csr = CsrMatrix::from(&coo);
            let mut csc = CscMatrix::from(&coo);
            coo.sort();
            csr.sort();
            csc.sort();
            let (coo1, csr1, csc1) = (coo.clone(), csr.clone(), csc.clone());
            coo.sort();
            csr.sort();
            csc.sort();
            prop_assert_eq!(coo, coo1);
            prop_assert_eq!(csr, csr1);
            prop_assert_eq!(csc, csc1);
        }

        #[test]
        fn condensation_keeps_no_empty_groups(t in triplets_strategy()) {
            let mut csr = CsrMatrix::from_triplets(8, 6, &t);
            let original = csr.clone();
            csr.condense_rows();
            csr.condense_cols();
            prop_assert_eq!(csr.row_list.len(), csr.nrows);
            prop_assert_eq!(csr.col_list.len(), csr.ncols);
            for row in 0..csr.nrows {
                prop_assert!(csr.row_len(row) > 0);
            }
            prop_assert!(csr.row_list.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(csr.col_list.windows(2).all(|w| w[0] < w[1]));

            // Every condensed entry maps back to an original entry.
            let restored: Vec<_> = csr
                .triplets()
                .into_iter()
                .map(|(r, c, v)| (csr.row_list[r], csr.col_list[c], v))
                .collect();
            prop_assert_eq!(sorted(restored), sorted(original.triplets()));
        }
    }
}
