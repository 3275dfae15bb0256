use owo_colors::OwoColorize;
use thiserror::Error;

use crate::form::DomainKind;
use crate::structs::Handle;

/// Fatal errors raised while making sense of an integral: malformed
/// measures, unknown metadata, ambiguous restrictions, shape mismatches.
/// They abort the offending integral's pipeline.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{}: unknown metadata key `{}`", .0, .1.bold())]
    UnknownMetadataKey(Handle, String),
    #[error("{}: malformed measure: {}", .0, .1)]
    MalformedMeasure(Handle, String),
    #[error(
        "{}: `{}` must be restricted to `+` or `-` in {} integrals",
        .0, .1.bold(), .2
    )]
    MissingRestriction(Handle, String, DomainKind),
    #[error("{}: restriction of `{}` is meaningless in {} integrals", .0, .1.bold(), .2)]
    SpuriousRestriction(Handle, String, DomainKind),
    #[error(
        "{}: {} expects operands of matching shape, found {} and {}",
        .0, .1.yellow().bold(), .2.blue(), .3.red()
    )]
    ShapeMismatch(Handle, &'static str, String, String),
    #[error("{}: expected a {} expression, found `{}`", .0, .1.white().bold(), .2)]
    InvalidShape(Handle, &'static str, String),
    #[error("{}: cannot lower `{}`", .0, .1)]
    NotLowerable(Handle, String),
    #[error("{}: `{}` only makes sense in facet integrals", .0, .1.bold())]
    NotOnAFacet(Handle, String),
}

/// Fatal configuration errors: missing or invalid per-integral options.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{}: custom measures require the metadata key `{}`", .0, "num_cells".bold())]
    MissingNumCells(Handle),
    #[error("{}: `num_cells` must be a positive integer, found `{}`", .0, .1.red())]
    InvalidNumCells(Handle, String),
    #[error("{}: `num_cells` is only meaningful on custom measures", .0)]
    SpuriousNumCells(Handle),
    #[error(
        "{}: invalid quadrature degree `{}`; expected a non-negative integer or \"auto\"",
        .0, .1.red()
    )]
    InvalidQuadratureDegree(Handle, String),
    #[error(
        "{}: invalid representation `{}`; expected \"quadrature\" or \"uflacs\"",
        .0, .1.red()
    )]
    InvalidRepresentation(Handle, String),
    #[error("unsupported element: {}", .0)]
    UnsupportedElement(String),
}
