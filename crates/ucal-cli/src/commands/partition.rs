use clap::Args;
use serde::Serialize;
use ucal_catalog::serde::to_canonical_json_pretty;
use ucal_catalog::{partition_labeled, CatalogView, Dimension, ScanSpan};
use ucal_core::errors::UcalError;

#[derive(Args, Debug)]
pub struct PartitionArgs {
    /// Comma separated dimensions, outermost first (noise, groups, samples, edges, scantype).
    #[arg(long, value_delimiter = ',', default_value = "noise,groups,samples,edges")]
    pub dims: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Leaf {
    pub label: Vec<(String, String)>,
    pub runs: usize,
    pub scan_span: Option<ScanSpan>,
    pub uids: Vec<String>,
}

pub fn leaves(args: &PartitionArgs, catalog: &CatalogView) -> Result<Vec<Leaf>, UcalError> {
    let dims = args
        .dims
        .iter()
        .map(|name| Dimension::parse(name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(partition_labeled(catalog.clone(), &dims)?
        .into_iter()
        .map(|(label, leaf)| Leaf {
            label: label
                .into_iter()
                .map(|(dim, value)| (dim.to_string(), value.to_string()))
                .collect(),
            runs: leaf.uids().count(),
            scan_span: ScanSpan::of(&leaf),
            uids: leaf.uids().map(str::to_string).collect(),
        })
        .collect())
}

pub fn run(args: &PartitionArgs, catalog: &CatalogView) -> Result<String, UcalError> {
    to_canonical_json_pretty(&leaves(args, catalog)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures;

    #[test]
    fn leaves_follow_requested_dimensions() {
        let args = PartitionArgs {
            dims: vec!["noise".into(), "group".into()],
        };
        let leaves = leaves(&args, &fixtures::catalog()).unwrap();
        assert_eq!(leaves.len(), 4);
        assert_eq!(
            leaves[0].label,
            vec![
                ("noise".to_string(), "n1".to_string()),
                ("groups".to_string(), "metals".to_string())
            ]
        );
        assert_eq!(leaves[0].uids, ["uid-1", "uid-3"]);
    }

    #[test]
    fn unknown_dimension_is_rejected() {
        let args = PartitionArgs {
            dims: vec!["colour".into()],
        };
        let err = leaves(&args, &fixtures::catalog()).unwrap_err();
        assert_eq!(err.code(), "keymap.dimension");
    }
}
