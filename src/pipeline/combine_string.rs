//! Parser for textual layer combine descriptions.
//!
//! ```text
//! RGBA = MODULATE(PREVIOUS, TEXTURE)
//! RGB  = INTERPOLATE(TEXTURE_1, PREVIOUS, CONSTANT[A])
//! A    = REPLACE(1 - PRIMARY[A])
//! ```
//!
//! A description holds either one `RGBA` statement or one `RGB` plus one `A`
//! statement, separated by whitespace, newlines or `;`. Arguments name a
//! source (`TEXTURE`, `TEXTURE_<n>`, `CONSTANT`, `PRIMARY`, `PREVIOUS`),
//! optionally prefixed with `1 -` and suffixed with a `[RGB]`, `[A]` or
//! `[RGBA]` mask.

use thiserror::Error;

use super::combine::{CombineChannel, CombineFunc, CombineOp, CombineSource, LayerCombine};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CombineStringError {
    #[error("unexpected end of combine string")]
    UnexpectedEnd,

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unknown channel mask '{0}', expected RGB, A or RGBA")]
    UnknownChannel(String),

    #[error("unknown combine function '{0}'")]
    UnknownFunction(String),

    #[error("unknown combine source '{0}'")]
    UnknownSource(String),

    #[error("{func} takes {expected} argument(s) but {found} were given")]
    WrongArgCount {
        func: String,
        expected: usize,
        found: usize,
    },

    #[error("DOT3 functions can only be used on RGB or RGBA statements")]
    Dot3OnAlpha,

    #[error("an alpha statement cannot read the [{0}] mask of a source")]
    ColorMaskInAlpha(String),

    #[error("the {0} channel is specified more than once")]
    DuplicateChannel(&'static str),

    #[error("both the RGB and A channels must be specified")]
    MissingChannel,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Target {
    Rgb,
    Alpha,
    Rgba,
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ';' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.text.len()
    }

    fn expect(&mut self, want: char) -> Result<(), CombineStringError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == want => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(ch) => Err(CombineStringError::UnexpectedChar {
                ch,
                offset: self.pos,
            }),
            None => Err(CombineStringError::UnexpectedEnd),
        }
    }

    fn eat(&mut self, want: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(want) {
            self.pos += want.len_utf8();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<&'a str, CombineStringError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return match self.peek() {
                Some(ch) => Err(CombineStringError::UnexpectedChar {
                    ch,
                    offset: self.pos,
                }),
                None => Err(CombineStringError::UnexpectedEnd),
            };
        }
        Ok(&self.text[start..self.pos])
    }
}

fn parse_target(name: &str) -> Result<Target, CombineStringError> {
    match name.to_ascii_uppercase().as_str() {
        "RGB" => Ok(Target::Rgb),
        "A" => Ok(Target::Alpha),
        "RGBA" => Ok(Target::Rgba),
        _ => Err(CombineStringError::UnknownChannel(name.to_string())),
    }
}

fn parse_func(name: &str) -> Result<CombineFunc, CombineStringError> {
    Ok(match name.to_ascii_uppercase().as_str() {
        "REPLACE" => CombineFunc::Replace,
        "MODULATE" => CombineFunc::Modulate,
        "ADD" => CombineFunc::Add,
        "ADD_SIGNED" => CombineFunc::AddSigned,
        "SUBTRACT" => CombineFunc::Subtract,
        "INTERPOLATE" => CombineFunc::Interpolate,
        "DOT3_RGB" => CombineFunc::Dot3Rgb,
        "DOT3_RGBA" => CombineFunc::Dot3Rgba,
        _ => return Err(CombineStringError::UnknownFunction(name.to_string())),
    })
}

fn parse_source(name: &str) -> Result<CombineSource, CombineStringError> {
    let upper = name.to_ascii_uppercase();
    Ok(match upper.as_str() {
        "TEXTURE" => CombineSource::Texture,
        "CONSTANT" => CombineSource::Constant,
        "PRIMARY" => CombineSource::PrimaryColor,
        "PREVIOUS" => CombineSource::Previous,
        _ => {
            let index = upper
                .strip_prefix("TEXTURE_")
                .and_then(|n| n.parse::<u32>().ok())
                .ok_or_else(|| CombineStringError::UnknownSource(name.to_string()))?;
            CombineSource::TextureLayer(index)
        }
    })
}

/// Parses one argument and resolves its operand for the statement target.
fn parse_arg(
    cursor: &mut Cursor<'_>,
    target: Target,
) -> Result<(CombineSource, CombineOp), CombineStringError> {
    cursor.skip_ws();
    let one_minus = if cursor.peek() == Some('1') {
        cursor.pos += 1;
        cursor.expect('-')?;
        true
    } else {
        false
    };

    let source = parse_source(cursor.ident()?)?;

    let mut read_alpha = target == Target::Alpha;
    if cursor.eat('[') {
        let mask = cursor.ident()?;
        match mask.to_ascii_uppercase().as_str() {
            "A" => read_alpha = true,
            "RGB" | "RGBA" if target == Target::Alpha => {
                return Err(CombineStringError::ColorMaskInAlpha(mask.to_string()));
            }
            "RGB" | "RGBA" => {}
            _ => return Err(CombineStringError::UnknownChannel(mask.to_string())),
        }
        cursor.expect(']')?;
    }

    let op = match (one_minus, read_alpha) {
        (false, false) => CombineOp::SrcColor,
        (true, false) => CombineOp::OneMinusSrcColor,
        (false, true) => CombineOp::SrcAlpha,
        (true, true) => CombineOp::OneMinusSrcAlpha,
    };
    Ok((source, op))
}

fn parse_statement(
    cursor: &mut Cursor<'_>,
) -> Result<(Target, CombineFunc, Vec<(CombineSource, CombineOp)>), CombineStringError> {
    let target = parse_target(cursor.ident()?)?;
    cursor.expect('=')?;

    let func_name = cursor.ident()?;
    let func = parse_func(func_name)?;
    if func.is_dot3() && target == Target::Alpha {
        return Err(CombineStringError::Dot3OnAlpha);
    }

    cursor.expect('(')?;
    let mut args = Vec::with_capacity(3);
    if !cursor.eat(')') {
        loop {
            args.push(parse_arg(cursor, target)?);
            if cursor.eat(')') {
                break;
            }
            cursor.expect(',')?;
        }
    }

    if args.len() != func.n_args() {
        return Err(CombineStringError::WrongArgCount {
            func: func_name.to_ascii_uppercase(),
            expected: func.n_args(),
            found: args.len(),
        });
    }

    Ok((target, func, args))
}

/// Alpha view of an argument list written for an `RGBA` statement.
fn alpha_args(args: &[(CombineSource, CombineOp)]) -> Vec<(CombineSource, CombineOp)> {
    args.iter()
        .map(|&(src, op)| {
            let op = if op.is_one_minus() {
                CombineOp::OneMinusSrcAlpha
            } else {
                CombineOp::SrcAlpha
            };
            (src, op)
        })
        .collect()
}

pub(crate) fn parse_combine_string(text: &str) -> Result<LayerCombine, CombineStringError> {
    let mut cursor = Cursor::new(text);
    let mut rgb: Option<CombineChannel> = None;
    let mut alpha: Option<CombineChannel> = None;

    while !cursor.at_end() {
        let (target, func, args) = parse_statement(&mut cursor)?;
        match target {
            Target::Rgba => {
                if rgb.is_some() {
                    return Err(CombineStringError::DuplicateChannel("RGB"));
                }
                if alpha.is_some() {
                    return Err(CombineStringError::DuplicateChannel("A"));
                }
                rgb = Some(CombineChannel::new(func, &args));
                alpha = Some(CombineChannel::new(func, &alpha_args(&args)));
            }
            Target::Rgb => {
                if rgb.is_some() {
                    return Err(CombineStringError::DuplicateChannel("RGB"));
                }
                rgb = Some(CombineChannel::new(func, &args));
            }
            Target::Alpha => {
                if alpha.is_some() {
                    return Err(CombineStringError::DuplicateChannel("A"));
                }
                alpha = Some(CombineChannel::new(func, &args));
            }
        }
    }

    match (rgb, alpha) {
        (Some(rgb), Some(alpha)) => Ok(LayerCombine { rgb, alpha }),
        _ => Err(CombineStringError::MissingChannel),
    }
}
