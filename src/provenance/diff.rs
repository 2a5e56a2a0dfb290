//! Line alignment between two revisions of a file.

/// One step of an alignment: both indices for an unchanged line, only the old
/// index for a deleted line, only the new index for an inserted line.
pub type AlignedPair = (Option<usize>, Option<usize>);

/// Computes an order-preserving, non-crossing alignment of two line sequences.
pub trait DiffEngine {
    fn align(&self, old: &[String], new: &[String]) -> Vec<AlignedPair>;
}

/// Cells above which a changed region is split instead of tabulated.
const TABLE_CELLS: usize = 1 << 20;

/// Longest-common-subsequence alignment.
///
/// The common prefix and suffix are matched directly. A changed middle of
/// up to [`TABLE_CELLS`] line pairs is solved with the quadratic table;
/// larger ones are halved (Hirschberg) until they fit, so memory stays
/// linear in the file length. Within each changed region deletions are
/// emitted before insertions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LcsDiff;

impl DiffEngine for LcsDiff {
    fn align(&self, old: &[String], new: &[String]) -> Vec<AlignedPair> {
        let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
        let suffix = old[prefix..]
            .iter()
            .rev()
            .zip(new[prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .count();
        let old_end = old.len() - suffix;
        let new_end = new.len() - suffix;

        let mut pairs = Vec::with_capacity(old.len().max(new.len()));
        pairs.extend((0..prefix).map(|i| (Some(i), Some(i))));
        align_middle(
            &old[prefix..old_end],
            &new[prefix..new_end],
            (prefix, prefix),
            TABLE_CELLS,
            &mut pairs,
        );
        pairs.extend((0..suffix).map(|i| (Some(old_end + i), Some(new_end + i))));
        pairs
    }
}

fn align_middle(
    a: &[String],
    b: &[String],
    base: (usize, usize),
    table_cells: usize,
    out: &mut Vec<AlignedPair>,
) {
    if a.len() <= 1 || b.is_empty() || a.len().saturating_mul(b.len()) <= table_cells {
        return align_table(a, b, base, out);
    }
    let mid = a.len() / 2;
    let forward = lcs_row(a[..mid].iter(), b.iter());
    let backward = lcs_row(a[mid..].iter().rev(), b.iter().rev());
    let m = b.len();
    let split = (0..=m)
        .max_by_key(|&j| (forward[j] + backward[m - j], std::cmp::Reverse(j)))
        .unwrap_or(0);
    align_middle(&a[..mid], &b[..split], base, table_cells, out);
    align_middle(
        &a[mid..],
        &b[split..],
        (base.0 + mid, base.1 + split),
        table_cells,
        out,
    );
}

/// Last row of the LCS table: `row[j]` is the LCS length of all of `a`
/// against the first `j` items of `b`.
fn lcs_row<'a, A, B>(a: A, b: B) -> Vec<u32>
where
    A: Iterator<Item = &'a String>,
    B: Iterator<Item = &'a String> + Clone,
{
    let m = b.clone().count();
    let mut prev = vec![0u32; m + 1];
    let mut cur = vec![0u32; m + 1];
    for x in a {
        for (j, y) in b.clone().enumerate() {
            cur[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev
}

fn align_table(a: &[String], b: &[String], base: (usize, usize), out: &mut Vec<AlignedPair>) {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // lcs[i * width + j] = length of the LCS of a[i..] and b[j..]
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let (old_base, new_base) = base;
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.push((Some(old_base + i), Some(new_base + j)));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            out.push((Some(old_base + i), None));
            i += 1;
        } else {
            out.push((None, Some(new_base + j)));
            j += 1;
        }
    }
    out.extend((i..n).map(|i| (Some(old_base + i), None)));
    out.extend((j..m).map(|j| (None, Some(new_base + j))));
}

/// Counts of matched, inserted and deleted lines in an alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub matched: usize,
    pub inserted: usize,
    pub deleted: usize,
}

impl DiffStats {
    pub fn of(pairs: &[AlignedPair]) -> Self {
        pairs.iter().fold(Self::default(), |mut stats, pair| {
            match pair {
                (Some(_), Some(_)) => stats.matched += 1,
                (None, Some(_)) => stats.inserted += 1,
                (Some(_), None) => stats.deleted += 1,
                (None, None) => {}
            }
            stats
        })
    }
}
