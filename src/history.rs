// history.rs
use std::cell::Cell;

use nalgebra::DVector;

use crate::common::{future_slack, LINEAR_SCAN_LIMIT};
use crate::dense_output::HermiteSegment;
use crate::IntegratorError;

/// A fully determined point of the trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub time: f64,
    pub state: DVector<f64>,
    pub derivative: DVector<f64>,
}

impl Anchor {
    pub fn new(time: f64, state: &[f64], derivative: &[f64]) -> Self {
        Self {
            time,
            state: DVector::from_column_slice(state),
            derivative: DVector::from_column_slice(derivative),
        }
    }
}

/// The anchors used to evaluate the history at one time.
#[derive(Debug, Clone, Copy)]
pub enum Bracket<'a> {
    /// Only one anchor is stored; the past is constant.
    Single(&'a Anchor),
    /// The query precedes the first anchor; extrapolate from the two earliest.
    Before(&'a Anchor, &'a Anchor),
    /// `lo.time <= time <= hi.time`.
    Interior(&'a Anchor, &'a Anchor),
}

impl<'a> Bracket<'a> {
    /// Writes the `order`-th time derivative of the history at `time` into `out`.
    pub fn eval(&self, time: f64, order: usize, out: &mut [f64]) {
        match *self {
            Bracket::Single(anchor) => {
                let source = match order {
                    0 => Some(&anchor.state),
                    1 if time == anchor.time => Some(&anchor.derivative),
                    _ => None,
                };
                match source {
                    Some(v) => out.copy_from_slice(v.as_slice()),
                    None => out.iter_mut().for_each(|x| *x = 0.0),
                }
            }
            Bracket::Before(lo, hi) | Bracket::Interior(lo, hi) => {
                HermiteSegment::new(lo, hi).eval(time, order, out)
            }
        }
    }

    /// Single component of [`Bracket::eval`].
    pub fn component(&self, time: f64, order: usize, index: usize) -> f64 {
        match *self {
            Bracket::Single(anchor) => match order {
                0 => anchor.state[index],
                1 if time == anchor.time => anchor.derivative[index],
                _ => 0.0,
            },
            Bracket::Before(lo, hi) | Bracket::Interior(lo, hi) => {
                HermiteSegment::new(lo, hi).component(time, order, index)
            }
        }
    }
}

/// Append-only store of anchors, sorted by strictly increasing time.
///
/// Lookups take `&self`; the cursor remembering the last bracket is a hint
/// kept in a `Cell`, so any number of delayed terms can read the store during
/// one right-hand-side evaluation.
#[derive(Debug, Clone)]
pub struct History {
    dimension: usize,
    anchors: Vec<Anchor>,
    cursor: Cell<usize>,
}

impl History {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            anchors: Vec::new(),
            cursor: Cell::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn first(&self) -> Option<&Anchor> {
        self.anchors.first()
    }

    pub fn last(&self) -> Option<&Anchor> {
        self.anchors.last()
    }

    pub fn append(&mut self, anchor: Anchor) -> Result<(), IntegratorError> {
        for found in [anchor.state.len(), anchor.derivative.len()] {
            if found != self.dimension {
                return Err(IntegratorError::DimensionMismatch {
                    expected: self.dimension,
                    found,
                });
            }
        }

        let last = self.anchors.last().map_or(f64::NEG_INFINITY, |a| a.time);
        if !anchor.time.is_finite() || anchor.time <= last {
            return Err(IntegratorError::OrderViolation {
                time: anchor.time,
                last,
            });
        }

        self.anchors.push(anchor);
        Ok(())
    }

    pub fn query_bracket(&self, time: f64) -> Result<Bracket<'_>, IntegratorError> {
        let n = self.anchors.len();
        let latest = match self.anchors.last() {
            Some(anchor) => anchor.time,
            None => return Err(IntegratorError::EmptyHistory),
        };

        if time.is_nan() || time > latest + future_slack(latest) {
            return Err(IntegratorError::FutureQuery { time, latest });
        }
        if n == 1 {
            return Ok(Bracket::Single(&self.anchors[0]));
        }
        if time < self.anchors[0].time {
            return Ok(Bracket::Before(&self.anchors[0], &self.anchors[1]));
        }

        let lo = self.locate(time);
        self.cursor.set(lo);
        Ok(Bracket::Interior(&self.anchors[lo], &self.anchors[lo + 1]))
    }

    /// Writes the `order`-th time derivative of the history at `time`.
    pub fn state_at(&self, time: f64, order: usize, out: &mut [f64]) -> Result<(), IntegratorError> {
        if out.len() != self.dimension {
            return Err(IntegratorError::DimensionMismatch {
                expected: self.dimension,
                found: out.len(),
            });
        }
        self.query_bracket(time)?.eval(time, order, out);
        Ok(())
    }

    /// Index `i` of the segment `[t_i, t_{i+1}]` holding `time`.
    /// Requires at least two anchors and `time >= t_0`.
    fn locate(&self, time: f64) -> usize {
        let anchors = &self.anchors;
        let last_segment = anchors.len() - 2;
        let mut i = self.cursor.get().min(last_segment);

        for _ in 0..LINEAR_SCAN_LIMIT {
            if time < anchors[i].time {
                if i == 0 {
                    return 0;
                }
                i -= 1;
            } else if time > anchors[i + 1].time && i < last_segment {
                i += 1;
            } else {
                return i;
            }
        }

        // scattered access
        let upper = anchors.partition_point(|a| a.time < time);
        upper.saturating_sub(1).min(last_segment)
    }
}
