use std::fmt;

/// Result of a position, packed into a single `i16`.
///
/// Encoding, from the side to move's point of view:
///
/// * `0` is a draw.
/// * A win in `d` plies is `8182 - d`, so faster wins compare greater.
/// * A loss in `d` plies is `-8182 + d`, with `-8182` a position that is
///   already checkmate.
/// * `-8192` marks an index that does not decode to a legal position.
///
/// The natural `i16` ordering is the preference order of the side to move:
/// fast win, slow win, draw, slow loss, fast loss.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Value(i16);

/// Significant bits of a packed value.
pub const VALUE_BITS: u32 = 14;

const ILLEGAL: i16 = -(1 << (VALUE_BITS - 1));
const MATE: i16 = ILLEGAL + 10;

const COMPRESSED_ILLEGAL: i8 = i8::MIN;
const COMPRESSED_DRAW: i8 = 0;
const COMPRESSED_MATE: i8 = -127;

impl Value {
    pub const ILLEGAL: Value = Value(ILLEGAL);
    pub const DRAW: Value = Value(0);
    /// Checkmate, i.e. a loss in zero plies.
    pub const MATE: Value = Value(MATE);

    /// Maximum ply depth that the encoding can hold.
    pub const MAX_DEPTH: u16 = (-MATE) as u16 - 1;

    pub fn win_in(plies: u16) -> Value {
        assert!(plies <= Value::MAX_DEPTH);
        Value(-MATE - plies as i16)
    }

    pub fn lose_in(plies: u16) -> Value {
        assert!(plies <= Value::MAX_DEPTH);
        Value(MATE + plies as i16)
    }

    pub fn is_win(self) -> bool {
        0 < self.0 && self.0 <= -MATE
    }

    pub fn is_lose(self) -> bool {
        MATE <= self.0 && self.0 < 0
    }

    pub fn is_legal(self) -> bool {
        self != Value::ILLEGAL
    }

    /// Ply distance to mate for a winning value.
    pub fn win_depth(self) -> u16 {
        debug_assert!(self.is_win());
        (-self.0 - MATE) as u16
    }

    /// Ply distance to mate for a losing value.
    pub fn lose_depth(self) -> u16 {
        debug_assert!(self.is_lose());
        (self.0 - MATE) as u16
    }

    /// Value of the same line one ply earlier, seen by the other side.
    ///
    /// A win of the opponent becomes a loss at the same depth, a loss of
    /// the opponent becomes a win one ply deeper. Draws and illegal marks
    /// are unchanged.
    pub fn opposite(self) -> Value {
        if self.is_win() {
            Value(-self.0)
        } else if self.is_lose() {
            Value(-self.0 - 1)
        } else {
            self
        }
    }

    pub fn classification(self) -> Classification {
        if self == Value::ILLEGAL {
            Classification::Illegal
        } else if self.is_win() {
            Classification::Win
        } else if self.is_lose() {
            Classification::Lose
        } else {
            Classification::Draw
        }
    }

    /// Single byte form used in staged page files, if the depth fits.
    pub fn compress(self) -> Option<i8> {
        if self == Value::ILLEGAL {
            Some(COMPRESSED_ILLEGAL)
        } else if self == Value::DRAW {
            Some(COMPRESSED_DRAW)
        } else if self.is_win() {
            i8::try_from(self.0 + MATE - COMPRESSED_MATE as i16)
                .ok()
                .filter(|c| *c > 0)
        } else if self.is_lose() {
            i8::try_from(self.0 - MATE + COMPRESSED_MATE as i16)
                .ok()
                .filter(|c| *c < 0)
        } else {
            None
        }
    }

    pub fn decompress(compressed: i8) -> Value {
        if compressed == COMPRESSED_ILLEGAL {
            Value::ILLEGAL
        } else if compressed > 0 {
            Value(compressed as i16 - MATE + COMPRESSED_MATE as i16)
        } else if compressed < 0 {
            Value(compressed as i16 + MATE - COMPRESSED_MATE as i16)
        } else {
            Value::DRAW
        }
    }

    pub fn to_raw(self) -> i16 {
        self.0
    }

    /// Validates a raw file value.
    pub fn from_raw(raw: i16) -> Option<Value> {
        if raw == ILLEGAL || (MATE..=-MATE).contains(&raw) {
            Some(Value(raw))
        } else {
            None
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Value::ILLEGAL {
            write!(f, "illegal")
        } else if self.is_win() {
            write!(f, "win in {}", self.win_depth())
        } else if self.is_lose() {
            write!(f, "lose in {}", self.lose_depth())
        } else {
            write!(f, "draw")
        }
    }
}

/// Coarse class of a value, used as compression context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Classification {
    Draw = 0,
    Win = 1,
    Lose = 2,
    Illegal = 3,
}

impl Classification {
    /// Number of classes that appear in the encoded symbol stream.
    pub const LEGAL_COUNT: usize = 3;

    pub fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing() {
        assert_eq!(Value::MATE, Value::lose_in(0));
        assert!(Value::MATE.is_lose());
        assert!(Value::win_in(1).is_win());
        assert_eq!(Value::win_in(7).win_depth(), 7);
        assert_eq!(Value::lose_in(12).lose_depth(), 12);
        assert!(!Value::DRAW.is_win());
        assert!(!Value::DRAW.is_lose());
        assert!(!Value::ILLEGAL.is_legal());
    }

    #[test]
    fn test_preference_order() {
        assert!(Value::win_in(3) > Value::win_in(10));
        assert!(Value::win_in(200) > Value::DRAW);
        assert!(Value::DRAW > Value::lose_in(200));
        assert!(Value::lose_in(10) > Value::lose_in(3));
        assert!(Value::lose_in(0) > Value::ILLEGAL);
    }

    #[test]
    fn test_opposite() {
        assert_eq!(Value::MATE.opposite(), Value::win_in(1));
        assert_eq!(Value::lose_in(4).opposite(), Value::win_in(5));
        assert_eq!(Value::win_in(5).opposite(), Value::lose_in(5));
        assert_eq!(Value::DRAW.opposite(), Value::DRAW);
        assert_eq!(Value::ILLEGAL.opposite(), Value::ILLEGAL);
    }

    #[test]
    fn test_compression() {
        for v in [
            Value::DRAW,
            Value::ILLEGAL,
            Value::MATE,
            Value::win_in(1),
            Value::win_in(126),
            Value::lose_in(126),
        ] {
            let c = v.compress().unwrap();
            assert_eq!(Value::decompress(c), v);
        }
        assert_eq!(Value::win_in(127).compress(), None);
        assert_eq!(Value::lose_in(127).compress(), None);
    }
}
