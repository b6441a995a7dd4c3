//! LDPC-Staircase erasure codec.
//!
//! Parity check matrix H = [H1 | H2]: H1 is sparse-random with 3 ones
//! per source column, H2 is the staircase double diagonal. Both peers
//! rebuild the same H1 from a deterministic PRNG seeded by the block
//! geometry, so no matrix travels on the wire. Decoding is iterative
//! single-unknown elimination with a GF(2) Gaussian fallback.

use super::FecError;

/// Ones per source column in H1.
const SOURCE_DEGREE: usize = 3;

/// Park-Miller minimal standard generator (as used by RFC 5170).
struct Prng {
    // ---
    state: u32,
}

impl Prng {
    // ---
    fn new(seed: u32) -> Self {
        // ---
        let state = seed % 0x7FFF_FFFF;
        Self {
            state: if state == 0 { 1 } else { state },
        }
    }

    fn next(&mut self) -> u32 {
        // ---
        self.state = ((self.state as u64 * 16807) % 0x7FFF_FFFF) as u32;
        self.state
    }

    fn below(&mut self, max: u32) -> u32 {
        // ---
        self.next() % max
    }
}

/// LDPC-Staircase block codec for a fixed (K, R) geometry.
#[derive(Debug, Clone)]
pub struct LdpcCodec {
    // ---
    k: usize,
    r: usize,

    /// Per equation row: participating source symbol ids (subset of 0..K).
    rows: Vec<Vec<usize>>,
}

impl LdpcCodec {
    // ---
    /// Builds the codec for `k` source and `r` repair symbols.
    pub fn new(k: usize, r: usize) -> Result<Self, FecError> {
        // ---
        if k == 0 || r == 0 || k + r > u16::MAX as usize {
            return Err(FecError::BadGeometry { k, r });
        }

        let mut prng = Prng::new((k as u32) << 16 | r as u32);
        let mut rows: Vec<Vec<usize>> = vec![Vec::new(); r];

        let degree = SOURCE_DEGREE.min(r);
        for col in 0..k {
            let mut picked = 0;
            while picked < degree {
                let row = prng.below(r as u32) as usize;
                if !rows[row].contains(&col) {
                    rows[row].push(col);
                    picked += 1;
                }
            }
        }

        // A row with no source participation makes its repair symbol a
        // bare copy of the previous one; give it one column instead.
        for row in rows.iter_mut() {
            if row.is_empty() {
                row.push(prng.below(k as u32) as usize);
            }
        }

        for row in rows.iter_mut() {
            row.sort_unstable();
        }

        Ok(Self { k, r, rows })
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
    pub fn encode(&self, source: &[&[u8]]) -> Vec<Vec<u8>> {
        // ---
        assert_eq!(source.len(), self.k, "ldpc: wrong source symbol count");
        let symbol_len = source.first().map_or(0, |s| s.len());

        let mut repair: Vec<Vec<u8>> = Vec::with_capacity(self.r);
        for (i, row) in self.rows.iter().enumerate() {
            let mut out = vec![0u8; symbol_len];
            for &col in row {
                xor_into(&mut out, source[col]);
            }
            if i > 0 {
                let prev = repair[i - 1].clone();
                xor_into(&mut out, &prev);
            }
            repair.push(out);
        }
        repair
    }

    /// Reconstructs missing source symbols in place.
    ///
    /// `symbols` has K+R slots indexed by encoding symbol id. On
    /// success every source slot `0..K` is filled; repair slots may be
    /// filled as a side effect of elimination.
    pub fn decode(&self, symbols: &mut [Option<Vec<u8>>]) -> Result<(), FecError> {
        // ---
        assert_eq!(symbols.len(), self.k + self.r, "ldpc: wrong slot count");

        if symbols.iter().filter(|s| s.is_some()).count() < self.k {
            return Err(FecError::InsufficientRank);
        }

        self.eliminate_iterative(symbols);

        if (0..self.k).all(|i| symbols[i].is_some()) {
            return Ok(());
        }

        self.eliminate_gaussian(symbols)
    }

    /// Equation row `i` as symbol ids: its sources, repair `i`, and
    /// repair `i - 1` (the staircase).
    fn equation(&self, i: usize) -> Vec<usize> {
        // ---
        let mut eq = self.rows[i].clone();
        eq.push(self.k + i);
        if i > 0 {
            eq.push(self.k + i - 1);
        }
        eq
    }

    /// Repeatedly solves equations with exactly one unknown.
    fn eliminate_iterative(&self, symbols: &mut [Option<Vec<u8>>]) {
        // ---
        let symbol_len = symbols
            .iter()
            .flatten()
            .next()
            .map_or(0, |s| s.len());

        let mut progress = true;
        while progress {
            progress = false;

            for i in 0..self.r {
                let eq = self.equation(i);
                let mut unknown = None;
                let mut n_unknown = 0;

                for &id in &eq {
                    if symbols[id].is_none() {
                        unknown = Some(id);
                        n_unknown += 1;
                    }
                }

                if n_unknown == 1 {
                    let target = unknown.expect("one unknown present");
                    let mut acc = vec![0u8; symbol_len];
                    for &id in &eq {
                        if id != target {
                            xor_into(&mut acc, symbols[id].as_ref().expect("known symbol"));
                        }
                    }
                    symbols[target] = Some(acc);
                    progress = true;
                }
            }
        }
    }

    /// Full GF(2) Gaussian elimination over the remaining unknowns.
    fn eliminate_gaussian(&self, symbols: &mut [Option<Vec<u8>>]) -> Result<(), FecError> {
        // ---
        let symbol_len = symbols
            .iter()
            .flatten()
            .next()
            .map_or(0, |s| s.len());

        let unknowns: Vec<usize> = (0..self.k + self.r)
            .filter(|&i| symbols[i].is_none())
            .collect();
        let index_of = |id: usize| unknowns.binary_search(&id).ok();

        // One augmented row per equation: coefficient bits over the
        // unknowns plus the XOR of its known symbols.
        let mut coef: Vec<Vec<bool>> = Vec::with_capacity(self.r);
        let mut rhs: Vec<Vec<u8>> = Vec::with_capacity(self.r);

        for i in 0..self.r {
            let mut bits = vec![false; unknowns.len()];
            let mut acc = vec![0u8; symbol_len];
            for &id in &self.equation(i) {
                match index_of(id) {
                    Some(pos) => bits[pos] = !bits[pos],
                    None => xor_into(&mut acc, symbols[id].as_ref().expect("known symbol")),
                }
            }
            coef.push(bits);
            rhs.push(acc);
        }

        // Forward elimination with back substitution folded in.
        let mut pivot_of = vec![usize::MAX; unknowns.len()];
        let mut used = vec![false; self.r];

        for col in 0..unknowns.len() {
            let Some(pivot) = (0..self.r).find(|&row| !used[row] && coef[row][col]) else {
                continue;
            };
            used[pivot] = true;
            pivot_of[col] = pivot;

            for row in 0..self.r {
                if row != pivot && coef[row][col] {
                    for c in 0..unknowns.len() {
                        coef[row][c] ^= coef[pivot][c];
                    }
                    let (p, q) = if pivot < row {
                        let (a, b) = rhs.split_at_mut(row);
                        (&a[pivot], &mut b[0])
                    } else {
                        let (a, b) = rhs.split_at_mut(pivot);
                        (&b[0], &mut a[row])
                    };
                    xor_into(q, p);
                }
            }
        }

        for (col, &id) in unknowns.iter().enumerate() {
            if id >= self.k {
                continue; // repair symbols need not be recovered
            }
            let pivot = pivot_of[col];
            if pivot == usize::MAX {
                return Err(FecError::InsufficientRank);
            }
            // A pivot row still touching another unknown means that
            // unknown never got a pivot: the system is rank deficient.
            if coef[pivot]
                .iter()
                .enumerate()
                .any(|(c, &bit)| bit && c != col)
            {
                return Err(FecError::InsufficientRank);
            }
            symbols[id] = Some(rhs[pivot].clone());
        }

        Ok(())
    }
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    // ---
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}
