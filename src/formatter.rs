//! Formatting collaborator: re-prints generated behavior text.

use crate::validate::{Diagnostic, ERR_CONFIG, ERR_FORMAT};
use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Beautify {
    Minify,
    /// Leave the script as generated.
    #[default]
    None,
    Pretty,
}

impl TryFrom<i8> for Beautify {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Beautify::Minify),
            0 => Ok(Beautify::None),
            1 => Ok(Beautify::Pretty),
            _ => Err("'beautify' should be one of these values [-1;0;1]".to_string()),
        }
    }
}

impl From<Beautify> for i8 {
    fn from(value: Beautify) -> Self {
        match value {
            Beautify::Minify => -1,
            Beautify::None => 0,
            Beautify::Pretty => 1,
        }
    }
}

impl Beautify {
    /// Config-file form of [`TryFrom`], reporting through a diagnostic.
    pub fn from_config(value: i64, file: &str) -> Result<Self, Diagnostic> {
        i8::try_from(value)
            .map_err(|_| "'beautify' should be one of these values [-1;0;1]".to_string())
            .and_then(Beautify::try_from)
            .map_err(|message| Diagnostic::new(ERR_CONFIG, &message, file, 1, 1))
    }
}

pub fn format_script(code: &str, beautify: Beautify) -> Result<String, Diagnostic> {
    if beautify == Beautify::None {
        return Ok(code.to_string());
    }

    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, SourceType::default().with_module(false)).parse();
    if let Some(error) = ret.errors.first() {
        return Err(Diagnostic::new(
            ERR_FORMAT,
            &format!("Generated script could not be formatted: {}", error),
            "",
            1,
            1,
        ));
    }

    let codegen = match beautify {
        Beautify::Minify => Codegen::new().with_options(CodegenOptions {
            minify: true,
            ..CodegenOptions::default()
        }),
        _ => Codegen::new(),
    };
    Ok(codegen.build(&ret.program).code)
}
