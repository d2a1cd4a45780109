//! Engine score normalization.
//!
//! UCI engines report scores relative to the side to move. Everything past the
//! session boundary works with a single white-positive perspective instead, so
//! the two viewpoints are separate types: [`RelScore`] is what came off the
//! wire, [`Eval`] is canonical. Normalization is the one conversion between
//! them, which makes accidental double-flipping unrepresentable.

use std::fmt;
use std::ops::Neg;

use shakmaty::Color;

/// A score as reported by the engine, relative to the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelScore {
    /// Centipawns (100 = one pawn).
    Cp(i32),
    /// Mate in N plies from the searched position's perspective.
    Mate(i32),
}

impl RelScore {
    /// Builds a score from the two tokens following `score` in an info line.
    /// `mate 0` is not a meaningful score and yields `None`, as does any
    /// unparseable value.
    pub fn parse(kind: &str, value: &str) -> Option<RelScore> {
        match kind {
            "cp" => value.parse().ok().map(RelScore::Cp),
            "mate" => match value.parse::<i32>().ok() {
                Some(0) | None => None,
                Some(n) => Some(RelScore::Mate(n)),
            },
            _ => None,
        }
    }
}

/// A canonical evaluation, positive meaning white is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eval {
    Cp(i32),
    /// Mate in |N| plies; the sign says which side delivers it.
    Mate(i32),
}

impl Eval {
    /// Normalizes a relative score into the white-positive perspective.
    /// The engine scored the position for `side_to_move`, so a black-to-move
    /// score flips sign.
    pub fn from_relative(rel: RelScore, side_to_move: Color) -> Eval {
        let eval = match rel {
            RelScore::Cp(v) => Eval::Cp(v),
            RelScore::Mate(n) => Eval::Mate(n),
        };
        match side_to_move {
            Color::White => eval,
            Color::Black => -eval,
        }
    }
}

impl Neg for Eval {
    type Output = Eval;

    fn neg(self) -> Eval {
        match self {
            Eval::Cp(v) => Eval::Cp(-v),
            Eval::Mate(n) => Eval::Mate(-n),
        }
    }
}

impl fmt::Display for Eval {
    /// Conventional GUI rendering: "+0.35", "-1.25", "M3", "-M2".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Eval::Cp(cp) => write!(f, "{:+.2}", cp as f64 / 100.0),
            Eval::Mate(n) if n > 0 => write!(f, "M{n}"),
            Eval::Mate(n) => write!(f, "-M{}", n.abs()),
        }
    }
}
