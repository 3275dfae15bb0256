use anyhow::*;
use itertools::Itertools;
use log::*;

use crate::errors::{ConfigError, ParseError};
use crate::form::{DomainKind, Form, Integral, MetaValue, METADATA_KEYS};

/// Integrals sharing one (domain kind, subdomain id) partition, in their
/// original relative order.
#[derive(Debug)]
pub struct IntegralGroup<'a> {
    pub kind: DomainKind,
    pub subdomain: Option<usize>,
    pub integrals: Vec<&'a Integral>,
}

/// Partition a form's integrals by (domain kind, subdomain id), keeping
/// group order by first appearance. Integrals whose measures differ only
/// additively (e.g. a cell measure alongside a custom one) are classified
/// independently; any merging of their scalar contributions is the form
/// algebra layer's business, not ours.
pub fn classify(form: &Form) -> Result<Vec<IntegralGroup>> {
    let errs = form
        .integrals
        .iter()
        .filter_map(|i| validate_measure(i).err())
        .collect::<Vec<_>>();
    if !errs.is_empty() {
        bail!(
            "in form `{}`:\n{}",
            form.name,
            errs.iter().map(|e| format!("  {:#}", e)).join("\n")
        );
    }

    let mut groups: Vec<IntegralGroup> = Vec::new();
    for integral in form.integrals.iter() {
        let kind = integral.measure.kind;
        let subdomain = integral.measure.subdomain;
        match groups
            .iter_mut()
            .find(|g| g.kind == kind && g.subdomain == subdomain)
        {
            Some(g) => g.integrals.push(integral),
            None => groups.push(IntegralGroup {
                kind,
                subdomain,
                integrals: vec![integral],
            }),
        }
    }

    debug!(
        "form `{}`: {} integral(s) in {} group(s)",
        form.name,
        form.integrals.len(),
        groups.len()
    );
    Ok(groups)
}

fn validate_measure(integral: &Integral) -> Result<()> {
    let handle = &integral.handle;
    let measure = &integral.measure;

    for key in measure.metadata.keys() {
        if !METADATA_KEYS.contains(key) {
            return Err(ParseError::UnknownMetadataKey(handle.clone(), key.to_owned()).into());
        }
    }

    match (measure.kind, measure.metadata.get("num_cells")) {
        (DomainKind::Custom, None) => Err(ConfigError::MissingNumCells(handle.clone()).into()),
        (DomainKind::Custom, Some(MetaValue::Int(n))) if *n < 1 => {
            Err(ConfigError::InvalidNumCells(handle.clone(), n.to_string()).into())
        }
        (DomainKind::Custom, Some(MetaValue::Str(s))) => {
            Err(ConfigError::InvalidNumCells(handle.clone(), s.clone()).into())
        }
        (_, Some(_)) if measure.kind != DomainKind::Custom => {
            Err(ConfigError::SpuriousNumCells(handle.clone()).into())
        }
        _ => Ok(()),
    }
}

/// The cell count a custom integral spans; classification has already
/// checked presence and positivity.
pub fn num_cells(integral: &Integral) -> usize {
    match (integral.measure.kind, integral.measure.metadata.get("num_cells")) {
        (DomainKind::Custom, Some(MetaValue::Int(n))) => *n as usize,
        _ => 1,
    }
}
