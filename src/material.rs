use std::{cmp::Ordering, error::Error, fmt, str::FromStr};

use rustc_hash::FxHashSet;
use shakmaty::{Board, ByColor, ByRole, Chess, Color, Position, Role};

/// Piece type order used in file names and header bytes.
const FILE_ROLES: [Role; 5] = [
    Role::Queen,
    Role::Rook,
    Role::Bishop,
    Role::Knight,
    Role::Pawn,
];

const PROMOTION_ROLES: [Role; 4] = [Role::Queen, Role::Rook, Role::Bishop, Role::Knight];

/// Non-king piece counts of one side.
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct MaterialSide {
    by_role: ByRole<u8>,
}

impl MaterialSide {
    pub fn empty() -> MaterialSide {
        MaterialSide {
            by_role: ByRole::default(),
        }
    }

    fn from_str_part(s: &str) -> Result<MaterialSide, ParseMaterialError> {
        let mut side = MaterialSide::empty();
        for ch in s.chars() {
            let role = Role::from_char(ch).ok_or(ParseMaterialError)?;
            if role == Role::King {
                return Err(ParseMaterialError);
            }
            *side.by_role.get_mut(role) += 1;
        }
        Ok(side)
    }

    /// Piece count without the king.
    pub fn count(&self) -> usize {
        self.by_role.into_iter().map(usize::from).sum()
    }

    pub fn has_pawns(&self) -> bool {
        self.by_role.pawn > 0
    }

    pub fn by_role(&self, role: Role) -> u8 {
        *self.by_role.get(role)
    }

    pub fn by_role_mut(&mut self, role: Role) -> &mut u8 {
        self.by_role.get_mut(role)
    }
}

impl Ord for MaterialSide {
    fn cmp(&self, other: &MaterialSide) -> Ordering {
        self.count()
            .cmp(&other.count())
            .then_with(|| self.by_role.queen.cmp(&other.by_role.queen))
            .then_with(|| self.by_role.rook.cmp(&other.by_role.rook))
            .then_with(|| self.by_role.bishop.cmp(&other.by_role.bishop))
            .then_with(|| self.by_role.knight.cmp(&other.by_role.knight))
            .then_with(|| self.by_role.pawn.cmp(&other.by_role.pawn))
    }
}

impl PartialOrd for MaterialSide {
    fn partial_cmp(&self, other: &MaterialSide) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MaterialSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("K")?;
        for role in FILE_ROLES {
            for _ in 0..self.by_role(role) {
                write!(f, "{}", role.upper_char())?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MaterialSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <MaterialSide as fmt::Display>::fmt(self, f)
    }
}

/// Material signature of a table: non-king pieces of both sides and the
/// side to move.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Material {
    pub by_color: ByColor<MaterialSide>,
    pub turn: Color,
}

impl Material {
    pub fn new(by_color: ByColor<MaterialSide>, turn: Color) -> Material {
        Material { by_color, turn }
    }

    pub fn from_board(board: &Board, turn: Color) -> Material {
        Material {
            by_color: ByColor::new_with(|color| {
                let mut side = MaterialSide::empty();
                side.by_role = board.material_side(color);
                side.by_role.king = 0;
                side
            }),
            turn,
        }
    }

    pub fn from_position(pos: &Chess) -> Material {
        Material::from_board(pos.board(), pos.turn())
    }

    /// Total piece count including both kings.
    pub fn count(&self) -> usize {
        2 + self.by_color.white.count() + self.by_color.black.count()
    }

    pub fn side(&self, color: Color) -> &MaterialSide {
        self.by_color.get(color)
    }

    pub fn has_pawns(&self) -> bool {
        self.by_color.white.has_pawns() || self.by_color.black.has_pawns()
    }

    /// En passant states can only occur when both sides have pawns.
    pub fn ep_possible(&self) -> bool {
        self.by_color.white.has_pawns() && self.by_color.black.has_pawns()
    }

    /// The same material seen from the other color's point of view.
    pub fn flipped(&self) -> Material {
        Material {
            by_color: self.by_color.clone().into_swapped(),
            turn: !self.turn,
        }
    }

    pub fn with_turn(&self, turn: Color) -> Material {
        Material {
            by_color: self.by_color.clone(),
            turn,
        }
    }

    /// Canonical orientation of the generation unit for this material.
    ///
    /// Both side-to-move tables of a placement are generated together, so
    /// the unit is identified with white to move and the stronger side
    /// playing white.
    pub fn normalized_placement(&self) -> Material {
        let by_color = if self.by_color.black > self.by_color.white {
            self.by_color.clone().into_swapped()
        } else {
            self.by_color.clone()
        };
        Material {
            by_color,
            turn: Color::White,
        }
    }

    /// File name of the table, e.g. `01000-00000-w.tbs` for KRvK with
    /// white to move.
    pub fn file_name(&self) -> String {
        let digits = |side: &MaterialSide| -> String {
            FILE_ROLES.iter().map(|r| {
                char::from(b'0' + side.by_role(*r).min(9))
            }).collect()
        };
        format!(
            "{}-{}-{}.tbs",
            digits(&self.by_color.white),
            digits(&self.by_color.black),
            self.turn.char()
        )
    }

    pub fn from_file_name(name: &str) -> Option<Material> {
        let name = name.strip_suffix(".tbs")?;
        let mut parts = name.splitn(3, '-');
        let white = parts.next()?;
        let black = parts.next()?;
        let turn = Color::from_char(parts.next()?.chars().next()?)?;
        let side = |s: &str| -> Option<MaterialSide> {
            if s.len() != FILE_ROLES.len() {
                return None;
            }
            let mut side = MaterialSide::empty();
            for (role, ch) in FILE_ROLES.iter().zip(s.chars()) {
                *side.by_role_mut(*role) = ch.to_digit(10)? as u8;
            }
            Some(side)
        };
        Some(Material {
            by_color: ByColor {
                white: side(white)?,
                black: side(black)?,
            },
            turn,
        })
    }

    /// All capture and promotion successors that generation depends on,
    /// as normalized placements. Bare-king results are omitted.
    pub fn sub_tables(&self) -> FxHashSet<Material> {
        let mut subs = FxHashSet::default();
        for mover in [Color::White, Color::Black] {
            self.add_captures(mover, &mut subs);
            if self.side(mover).has_pawns() {
                for promotion in PROMOTION_ROLES {
                    let mut promoted = self.with_turn(!mover);
                    *promoted.by_color.get_mut(mover).by_role_mut(Role::Pawn) -= 1;
                    *promoted.by_color.get_mut(mover).by_role_mut(promotion) += 1;
                    promoted.insert_placement(&mut subs);
                    promoted.add_captures(mover, &mut subs);
                }
            }
        }
        subs
    }

    fn add_captures(&self, mover: Color, subs: &mut FxHashSet<Material>) {
        for role in FILE_ROLES {
            if self.side(!mover).by_role(role) > 0 {
                let mut sub = self.with_turn(!mover);
                *sub.by_color.get_mut(!mover).by_role_mut(role) -= 1;
                sub.insert_placement(subs);
            }
        }
    }

    fn insert_placement(&self, subs: &mut FxHashSet<Material>) {
        if self.count() > 2 {
            subs.insert(self.normalized_placement());
        }
    }
}

impl Ord for Material {
    fn cmp(&self, other: &Material) -> Ordering {
        self.by_color
            .white
            .cmp(&other.by_color.white)
            .then_with(|| self.by_color.black.cmp(&other.by_color.black))
            .then_with(|| {
                self.turn
                    .fold_wb(0u8, 1u8)
                    .cmp(&other.turn.fold_wb(0u8, 1u8))
            })
    }
}

impl PartialOrd for Material {
    fn partial_cmp(&self, other: &Material) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}v{} {}",
            self.by_color.white,
            self.by_color.black,
            self.turn.char()
        )
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Material as fmt::Display>::fmt(self, f)
    }
}

/// Error when parsing an invalid material signature.
#[derive(Debug, Clone)]
pub struct ParseMaterialError;

impl fmt::Display for ParseMaterialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid material signature")
    }
}

impl Error for ParseMaterialError {}

impl FromStr for Material {
    type Err = ParseMaterialError;

    fn from_str(s: &str) -> Result<Material, Self::Err> {
        let (sides, turn) = match s.split_once(' ') {
            Some((sides, turn)) => {
                let turn = match turn {
                    "w" => Color::White,
                    "b" => Color::Black,
                    _ => return Err(ParseMaterialError),
                };
                (sides, turn)
            }
            None => (s, Color::White),
        };
        let (white, black) = sides.split_once('v').ok_or(ParseMaterialError)?;
        let white = white.strip_prefix('K').ok_or(ParseMaterialError)?;
        let black = black.strip_prefix('K').ok_or(ParseMaterialError)?;
        Ok(Material {
            by_color: ByColor {
                white: MaterialSide::from_str_part(white)?,
                black: MaterialSide::from_str_part(black)?,
            },
            turn,
        })
    }
}
