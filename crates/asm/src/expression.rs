//! Constant expression folding.
//!
//! Expressions are trees of integer literals, identifiers (label addresses)
//! and operators, evaluated over `i64` so that 32-bit intermediates may
//! overflow without wrapping surprises; use sites truncate to 32 bits.

use g10_object::g10::Address;

use crate::Error;

/// A constant expression over integers and label addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// An integer literal.
    Number(i64),
    /// An identifier, resolving to a label's absolute address.
    Symbol(String),
    /// A unary operator applied to an operand.
    Unary(UnaryOperator, Box<Expression>),
    /// A binary operator applied to two operands.
    Binary(BinaryOperator, Box<Expression>, Box<Expression>),
}

/// A unary operator; all bind tighter than any binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// `-x` — arithmetic complement.
    Negate,
    /// `~x` — bitwise complement.
    Complement,
    /// `!x` — `1` if `x == 0`, else `0`.
    Not,
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `|`, precedence 1 (lowest).
    BitOr,
    /// `^`, precedence 2.
    BitXor,
    /// `&`, precedence 3.
    BitAnd,
    /// `<<`, precedence 4.
    ShiftLeft,
    /// `>>`, precedence 4. Arithmetic on the signed interpretation.
    ShiftRight,
    /// `+`, precedence 5.
    Add,
    /// `-`, precedence 5.
    Subtract,
    /// `*`, precedence 6.
    Multiply,
    /// `/`, precedence 6. Division by zero is a hard error.
    Divide,
    /// `%`, precedence 6. Remainder by zero is a hard error.
    Remainder,
    /// `**`, precedence 7, the only right-associative binary operator:
    /// `2 ** 3 ** 2` is `2 ** 9`.
    Power,
}

impl BinaryOperator {
    /// Precedence level, lowest to highest. The upstream parser builds trees
    /// with these levels; the evaluator only folds them.
    pub fn precedence(self) -> u8 {
        match self {
            Self::BitOr => 1,
            Self::BitXor => 2,
            Self::BitAnd => 3,
            Self::ShiftLeft | Self::ShiftRight => 4,
            Self::Add | Self::Subtract => 5,
            Self::Multiply | Self::Divide | Self::Remainder => 6,
            Self::Power => 7,
        }
    }

    /// Whether the operator groups right-to-left.
    pub fn is_right_associative(self) -> bool {
        matches!(self, Self::Power)
    }
}

/// Resolution of identifiers to addresses, provided by the symbol table.
pub trait SymbolResolver {
    /// The absolute address of `name`, if known at this point.
    fn resolve(&self, name: &str) -> Option<Address>;
}

/// The empty scope: nothing resolves.
impl SymbolResolver for () {
    fn resolve(&self, _name: &str) -> Option<Address> {
        None
    }
}

/// The outcome of reducing an expression at emission time: either a folded
/// value, or a single unresolved symbol plus a constant addend, suitable for
/// promotion to a relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// The expression folded to a constant.
    Known(i64),
    /// The expression is `symbol ± constant` over one unresolved name.
    Symbolic {
        /// The unresolved symbol.
        symbol: String,
        /// The constant addend.
        addend: i32,
    },
}

impl Expression {
    /// Shorthand for a literal.
    pub fn number(value: i64) -> Self {
        Self::Number(value)
    }

    /// Shorthand for an identifier.
    pub fn symbol(name: &str) -> Self {
        Self::Symbol(name.to_owned())
    }

    /// Shorthand for a unary node.
    pub fn unary(operator: UnaryOperator, operand: Self) -> Self {
        Self::Unary(operator, Box::new(operand))
    }

    /// Shorthand for a binary node.
    pub fn binary(operator: BinaryOperator, lhs: Self, rhs: Self) -> Self {
        Self::Binary(operator, Box::new(lhs), Box::new(rhs))
    }

    /// Fold the expression to an `i64`.
    pub fn evaluate(&self, resolver: &dyn SymbolResolver) -> Result<i64, Error> {
        match self {
            Self::Number(value) => Ok(*value),

            Self::Symbol(name) => resolver
                .resolve(name)
                .map(|address| i64::from(address.0))
                .ok_or_else(|| Error::UndefinedSymbol(name.clone())),

            Self::Unary(operator, operand) => {
                let operand = operand.evaluate(resolver)?;

                Ok(match operator {
                    UnaryOperator::Negate => operand.wrapping_neg(),
                    UnaryOperator::Complement => !operand,
                    UnaryOperator::Not => i64::from(operand == 0),
                })
            }

            Self::Binary(operator, lhs, rhs) => {
                let lhs = lhs.evaluate(resolver)?;
                let rhs = rhs.evaluate(resolver)?;

                match operator {
                    BinaryOperator::BitOr => Ok(lhs | rhs),
                    BinaryOperator::BitXor => Ok(lhs ^ rhs),
                    BinaryOperator::BitAnd => Ok(lhs & rhs),
                    // Shift counts are taken modulo 64.
                    BinaryOperator::ShiftLeft => Ok(lhs.wrapping_shl(rhs as u32)),
                    BinaryOperator::ShiftRight => Ok(lhs.wrapping_shr(rhs as u32)),
                    BinaryOperator::Add => Ok(lhs.wrapping_add(rhs)),
                    BinaryOperator::Subtract => Ok(lhs.wrapping_sub(rhs)),
                    BinaryOperator::Multiply => Ok(lhs.wrapping_mul(rhs)),
                    BinaryOperator::Divide => {
                        if rhs == 0 {
                            Err(Error::DivisionByZero)
                        } else {
                            Ok(lhs.wrapping_div(rhs))
                        }
                    }
                    BinaryOperator::Remainder => {
                        if rhs == 0 {
                            Err(Error::DivisionByZero)
                        } else {
                            Ok(lhs.wrapping_rem(rhs))
                        }
                    }
                    BinaryOperator::Power => {
                        let exponent = u32::try_from(rhs).map_err(|_| {
                            Error::ValueOutOfRange("an exponent".to_owned(), rhs)
                        })?;

                        Ok(lhs.wrapping_pow(exponent))
                    }
                }
            }
        }
    }

    /// Fold the expression to a 32-bit address, truncating.
    pub fn evaluate_address(&self, resolver: &dyn SymbolResolver) -> Result<Address, Error> {
        Ok(Address(self.evaluate(resolver)? as u32))
    }

    /// Reduce the expression at emission time.
    ///
    /// A fully resolvable expression folds to [`Value::Known`]. An
    /// expression whose only obstacle is one unresolved identifier in
    /// `symbol ± constant` shape reduces to [`Value::Symbolic`]; anything
    /// else propagates the undefined-symbol error.
    pub fn reduce(&self, resolver: &dyn SymbolResolver) -> Result<Value, Error> {
        match self.evaluate(resolver) {
            Ok(value) => Ok(Value::Known(value)),

            Err(Error::UndefinedSymbol(name)) => {
                let (symbol, addend) = self
                    .split_symbolic(resolver)
                    .ok_or_else(|| Error::UndefinedSymbol(name))?;

                let addend = i32::try_from(addend)
                    .map_err(|_| Error::ValueOutOfRange("a relocation addend".to_owned(), addend))?;

                Ok(Value::Symbolic { symbol, addend })
            }

            Err(error) => Err(error),
        }
    }

    fn split_symbolic(&self, resolver: &dyn SymbolResolver) -> Option<(String, i64)> {
        match self {
            Self::Symbol(name) if resolver.resolve(name).is_none() => Some((name.clone(), 0)),

            Self::Binary(BinaryOperator::Add, lhs, rhs) => {
                if let Ok(offset) = rhs.evaluate(resolver) {
                    lhs.split_symbolic(resolver)
                        .map(|(symbol, addend)| (symbol, addend.wrapping_add(offset)))
                } else if let Ok(offset) = lhs.evaluate(resolver) {
                    rhs.split_symbolic(resolver)
                        .map(|(symbol, addend)| (symbol, offset.wrapping_add(addend)))
                } else {
                    None
                }
            }

            Self::Binary(BinaryOperator::Subtract, lhs, rhs) => {
                let offset = rhs.evaluate(resolver).ok()?;

                lhs.split_symbolic(resolver)
                    .map(|(symbol, addend)| (symbol, addend.wrapping_sub(offset)))
            }

            _ => None,
        }
    }
}

impl From<i64> for Expression {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Expression {
    fn from(name: &str) -> Self {
        Self::Symbol(name.to_owned())
    }
}
