//! Distributed dense vector: each rank holds one contiguous slice.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use rand::Rng;

use crate::comm_pkg::check_len;
use crate::error::Result;
use crate::partition::Partition;

#[derive(Debug, Clone)]
pub struct ParVector {
    pub global_n: usize,
    pub first_local: usize,
    pub local: Vec<f64>,
    partition: Arc<Partition>,
}

impl ParVector {
    /// Zero vector laid out like the rows of `partition`.
    pub fn from_rows(partition: &Arc<Partition>) -> Self {
        Self {
            global_n: partition.global_num_rows,
            first_local: partition.first_local_row,
            local: vec![0.0; partition.local_num_rows],
            partition: Arc::clone(partition),
        }
    }

    /// Zero vector laid out like the columns of `partition`.
    pub fn from_cols(partition: &Arc<Partition>) -> Self {
        Self {
            global_n: partition.global_num_cols,
            first_local: partition.first_local_col,
            local: vec![0.0; partition.local_num_cols],
            partition: Arc::clone(partition),
        }
    }

    pub fn local_n(&self) -> usize {
        self.local.len()
    }

    pub fn set_const_value(&mut self, value: f64) {
        self.local.fill(value);
    }

    /// Uniform values in `[0, 1)`.
    pub fn set_rand_values<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for v in self.local.iter_mut() {
            *v = rng.gen::<f64>();
        }
    }

    /// self += alpha * x
    pub fn axpy(&mut self, x: &ParVector, alpha: f64) -> Result<()> {
        check_len("x", x.local.len(), self.local.len())?;
        for (y, &xv) in self.local.iter_mut().zip(&x.local) {
            *y += alpha * xv;
        }
        Ok(())
    }

    pub fn scale(&mut self, alpha: f64) {
        for v in self.local.iter_mut() {
            *v *= alpha;
        }
    }

    /// Sum of `|v|^p` over the local slice.
    fn local_power_sum(&self, p: f64) -> f64 {
        self.local.iter().map(|v| v.abs().powf(p)).sum()
    }

    /// p-norm of the local slice only.
    pub fn local_norm(&self, p: f64) -> f64 {
        self.local_power_sum(p).powf(1.0 / p)
    }

    /// p-norm of the whole distributed vector. Collective.
    pub fn norm(&self, p: f64) -> Result<f64> {
        let total = self.partition.comm().all_reduce_sum(self.local_power_sum(p))?;
        Ok(total.powf(1.0 / p))
    }

    /// Dot product with another vector on the same layout. Collective.
    pub fn dot(&self, other: &ParVector) -> Result<f64> {
        check_len("other", other.local.len(), self.local.len())?;
        let local: f64 = self.local.iter().zip(&other.local).map(|(a, b)| a * b).sum();
        self.partition.comm().all_reduce_sum(local)
    }

    /// Local entries with their global index, one per line.
    pub fn print(&self) -> String {
        self.local
            .iter()
            .enumerate()
            .map(|(i, v)| format!("x[{}] = {v:e}\n", self.first_local + i))
            .collect()
    }
}

impl Deref for ParVector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.local
    }
}

impl DerefMut for ParVector {
    fn deref_mut(&mut self) -> &mut [f64] {
        &mut self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ThreadComm;
    use crate::partition::Context;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn norms_combine_across_ranks() {
        let got = ThreadComm::run(3, |comm| {
            let ctx = Context::new(comm);
            let part = Partition::new(&ctx, 7, 7).unwrap();
            let mut v = ParVector::from_rows(&part);
            v.set_const_value(-2.0);
            (v.local_norm(2.0), v.norm(2.0).unwrap(), v.norm(1.0).unwrap())
        });
        // 7 entries of -2: ||v||_2 = 2 * sqrt(7), ||v||_1 = 14.
        for (local, two, one) in got {
            assert!(local > 0.0);
            assert_abs_diff_eq!(two, 2.0 * 7f64.sqrt(), epsilon = 1e-12);
            assert_abs_diff_eq!(one, 14.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn axpy_and_scale() {
        let got = ThreadComm::run(2, |comm| {
            let ctx = Context::new(comm);
            let part = Partition::new(&ctx, 4, 4).unwrap();
            let mut x = ParVector::from_rows(&part);
            let mut y = ParVector::from_rows(&part);
            x.set_const_value(1.0);
            y.set_const_value(3.0);
            y.axpy(&x, 2.0).unwrap();
            y.scale(0.5);
            (y.local.clone(), y.dot(&x).unwrap())
        });
        assert_eq!(got[0], (vec![2.5, 2.5], 10.0));
        assert_eq!(got[1], (vec![2.5, 2.5], 10.0));
    }

    #[test]
    fn rand_values_in_unit_interval() {
        let got = ThreadComm::run(1, |comm| {
            let ctx = Context::new(comm);
            let part = Partition::new(&ctx, 50, 50).unwrap();
            let mut v = ParVector::from_rows(&part);
            v.set_rand_values(&mut StdRng::seed_from_u64(7));
            v.local
        });
        assert!(got[0].iter().all(|&x| (0.0..1.0).contains(&x)));
    }

    #[test]
    fn print_uses_global_indices() {
        let got = ThreadComm::run(2, |comm| {
            let ctx = Context::new(comm);
            let part = Partition::new(&ctx, 2, 2).unwrap();
            let mut v = ParVector::from_rows(&part);
            v.set_const_value(0.5);
            v.print()
        });
        assert_eq!(got[1], "x[1] = 5e-1\n");
    }
}
