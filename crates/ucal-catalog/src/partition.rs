use tracing::debug;
use ucal_core::errors::UcalError;
use ucal_core::MetaValue;

use crate::keymap::Dimension;
use crate::query::Query;
use crate::view::CatalogSearch;

/// Path of bucket keys leading from the root catalog to one partition leaf.
pub type PartitionLabel = Vec<(Dimension, MetaValue)>;

/// Recursively splits `catalog` along `dimensions`, outermost first.
///
/// Each level buckets the current catalog by the distinct defined values of
/// its dimension; runs without a value are dropped at that level. With no
/// dimensions left the catalog itself is the single leaf. Leaves come out in
/// depth-first order with buckets visited in ascending value order.
pub fn partition<C: CatalogSearch>(catalog: C, dimensions: &[Dimension]) -> Result<Vec<C>, UcalError> {
    Ok(partition_labeled(catalog, dimensions)?
        .into_iter()
        .map(|(_, leaf)| leaf)
        .collect())
}

/// Same as [`partition`] but keeps the bucket keys that lead to each leaf.
pub fn partition_labeled<C: CatalogSearch>(
    catalog: C,
    dimensions: &[Dimension],
) -> Result<Vec<(PartitionLabel, C)>, UcalError> {
    let mut leaves = Vec::new();
    descend(catalog, dimensions, &mut Vec::new(), &mut leaves)?;
    Ok(leaves)
}

fn descend<C: CatalogSearch>(
    catalog: C,
    dimensions: &[Dimension],
    label: &mut PartitionLabel,
    leaves: &mut Vec<(PartitionLabel, C)>,
) -> Result<(), UcalError> {
    let Some((dimension, rest)) = dimensions.split_first() else {
        leaves.push((label.clone(), catalog));
        return Ok(());
    };
    let path = catalog.key_map().path(*dimension)?.to_string();
    let values = catalog.list_distinct_values(&path);
    debug!(
        dimension = %dimension,
        path = %path,
        buckets = values.len(),
        runs = catalog.len(),
        "partitioning catalog"
    );
    for value in values {
        let bucket = catalog.search(&Query::Eq {
            key: path.clone(),
            value: value.clone(),
        });
        label.push((*dimension, value));
        descend(bucket, rest, label, leaves)?;
        label.pop();
    }
    Ok(())
}
