//! Reed-Solomon erasure codec over GF(256).
//!
//! Systematic construction: a (K+R) x K Vandermonde matrix is
//! normalized so its top K rows form the identity; the bottom R rows
//! generate the repair symbols. Any K received symbols span the block,
//! so decoding is a K x K inversion over the rows that survived.

use super::gf256;
use super::FecError;

/// Reed-Solomon block codec for a fixed (K, R) geometry.
#[derive(Debug, Clone)]
pub struct Rs8mCodec {
    // ---
    k: usize,
    r: usize,

    /// Bottom R rows of the systematic generator matrix (R x K).
    parity: Vec<Vec<u8>>,
}

impl Rs8mCodec {
    // ---
    /// Builds the codec for `k` source and `r` repair symbols.
    ///
    /// # Errors
    ///
    /// Fails when `k + r` exceeds the field size (255 symbols).
    pub fn new(k: usize, r: usize) -> Result<Self, FecError> {
        // ---
        if k == 0 || r == 0 || k + r > 255 {
            return Err(FecError::BadGeometry { k, r });
        }

        let rows = k + r;

        // Vandermonde: V[i][j] = alpha^(i*j).
        let mut vand = vec![vec![0u8; k]; rows];
        for (i, row) in vand.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = gf256::exp(i * j);
            }
        }

        let top_inv = invert(&vand[..k].to_vec()).ok_or(FecError::BadGeometry { k, r })?;

        // Systematic generator: G = V * inv(V_top). Top K rows become
        // the identity; keep only the parity rows.
        let mut parity = vec![vec![0u8; k]; r];
        for i in 0..r {
            for j in 0..k {
                let mut acc = 0u8;
                for (m, inv_row) in top_inv.iter().enumerate() {
                    acc ^= gf256::mul(vand[k + i][m], inv_row[j]);
                }
                parity[i][j] = acc;
            }
        }

        Ok(Self { k, r, parity })
    }

    pub fn n_source(&self) -> usize {
        // ---
        self.k
    }

    pub fn n_repair(&self) -> usize {
        // ---
        self.r
    }

    /// Produces the R repair symbols for a full set of K source symbols.
    ///
    /// All source symbols must have equal length.
    pub fn encode(&self, source: &[&[u8]]) -> Vec<Vec<u8>> {
        // ---
        assert_eq!(source.len(), self.k, "rs8m: wrong source symbol count");
        let symbol_len = source.first().map_or(0, |s| s.len());

        let mut repair = vec![vec![0u8; symbol_len]; self.r];
        for (i, out) in repair.iter_mut().enumerate() {
            for (j, src) in source.iter().enumerate() {
                gf256::mul_add_slice(out, src, self.parity[i][j]);
            }
        }
        repair
    }

    /// Reconstructs missing source symbols in place.
    ///
    /// `symbols` has K+R slots indexed by encoding symbol id; received
    /// symbols are `Some`. On success every source slot `0..K` is
    /// filled. Repair slots are left untouched.
    ///
    /// # Errors
    ///
    /// `InsufficientRank` when fewer than K symbols are present.
    pub fn decode(&self, symbols: &mut [Option<Vec<u8>>]) -> Result<(), FecError> {
        // ---
        assert_eq!(symbols.len(), self.k + self.r, "rs8m: wrong slot count");

        let missing: Vec<usize> = (0..self.k).filter(|&i| symbols[i].is_none()).collect();
        if missing.is_empty() {
            return Ok(());
        }

        // Pick K present rows, sources first (identity rows are free).
        let mut rows: Vec<usize> = (0..self.k).filter(|&i| symbols[i].is_some()).collect();
        for i in self.k..self.k + self.r {
            if rows.len() == self.k {
                break;
            }
            if symbols[i].is_some() {
                rows.push(i);
            }
        }
        if rows.len() < self.k {
            return Err(FecError::InsufficientRank);
        }

        // Sub-matrix of the generator restricted to the chosen rows.
        let sub: Vec<Vec<u8>> = rows
            .iter()
            .map(|&row| {
                if row < self.k {
                    let mut e = vec![0u8; self.k];
                    e[row] = 1;
                    e
                } else {
                    self.parity[row - self.k].clone()
                }
            })
            .collect();

        let inverse = invert(&sub).ok_or(FecError::InsufficientRank)?;

        let symbol_len = symbols[rows[0]].as_ref().map_or(0, |s| s.len());
        for &j in &missing {
            let mut out = vec![0u8; symbol_len];
            for (m, &row) in rows.iter().enumerate() {
                let data = symbols[row].as_ref().expect("row was checked present");
                gf256::mul_add_slice(&mut out, data, inverse[j][m]);
            }
            symbols[j] = Some(out);
        }

        Ok(())
    }
}

/// Inverts a square matrix over GF(256) via Gauss-Jordan elimination.
fn invert(matrix: &Vec<Vec<u8>>) -> Option<Vec<Vec<u8>>> {
    // ---
    let n = matrix.len();
    let mut a: Vec<Vec<u8>> = matrix.clone();
    let mut inv: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            let mut row = vec![0u8; n];
            row[i] = 1;
            row
        })
        .collect();

    for col in 0..n {
        // Find a pivot.
        let pivot = (col..n).find(|&row| a[row][col] != 0)?;
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let scale = gf256::inv(a[col][col]);
        gf256::mul_slice(&mut a[col], scale);
        gf256::mul_slice(&mut inv[col], scale);

        for row in 0..n {
            if row != col && a[row][col] != 0 {
                let c = a[row][col];
                let (a_col, a_row) = two_rows(&mut a, col, row);
                gf256::mul_add_slice(a_row, a_col, c);
                let (i_col, i_row) = two_rows(&mut inv, col, row);
                gf256::mul_add_slice(i_row, i_col, c);
            }
        }
    }

    Some(inv)
}

/// Splits out immutable row `src` and mutable row `dst` of a matrix.
fn two_rows(m: &mut [Vec<u8>], src: usize, dst: usize) -> (&[u8], &mut [u8]) {
    // ---
    assert_ne!(src, dst);
    if src < dst {
        let (a, b) = m.split_at_mut(dst);
        (&a[src], &mut b[0])
    } else {
        let (a, b) = m.split_at_mut(src);
        (&b[0], &mut a[dst])
    }
}
