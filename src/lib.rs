//! # QBasic Lang
//!
//! A compiler and virtual machine for the QBasic / QuickBASIC 4.5 dialect
//! of structured BASIC, with a handful of QB64 extensions.
//! ```text
//! $ qbasic run HELLO.BAS
//! Hello, World!
//! ```
//!
//! Source text flows through `lang` (lexer, parser, semantic analyzer) and
//! then through `mach` (bytecode emitter, image, stack VM). The two halves
//! meet at [`lang::Module`], the analyzed syntax tree.

pub mod lang;
pub mod mach;
pub mod repl;

use lang::Diagnostic;
use mach::Image;

/// Run the front half of the pipeline. The stages short-circuit: the
/// first stage that reports an error stops the run, so later stages never
/// see a broken tree. Warnings ride along with a successful image.
pub fn compile(source: &str) -> Result<(Image, Vec<Diagnostic>), Vec<Diagnostic>> {
    let mut warnings = Vec::new();
    let (tokens, diagnostics) = lang::lex(source);
    let (mut errors, warn): (Vec<_>, Vec<_>) =
        diagnostics.into_iter().partition(|d| !d.is_warning());
    warnings.extend(warn);
    if !errors.is_empty() {
        return Err(errors);
    }
    let (mut module, diagnostics) = lang::parse(&tokens);
    let (parse_errors, warn): (Vec<_>, Vec<_>) =
        diagnostics.into_iter().partition(|d| !d.is_warning());
    warnings.extend(warn);
    errors.extend(parse_errors);
    if !errors.is_empty() {
        return Err(errors);
    }
    let (analysis, diagnostics) = lang::analyze(&mut module);
    let (sem_errors, warn): (Vec<_>, Vec<_>) =
        diagnostics.into_iter().partition(|d| !d.is_warning());
    warnings.extend(warn);
    errors.extend(sem_errors);
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok((mach::emit(&module, &analysis), warnings))
}
