//! Print the operator's CustomResourceDefinitions as a multi-document YAML stream.

use anyhow::{Context, Result};
use gateway_operator::crd::all_crds;

fn main() -> Result<()> {
    for crd in all_crds() {
        let yaml = serde_yaml::to_string(&crd).context("Failed to serialize CRD to YAML")?;
        println!("---");
        print!("{yaml}");
    }
    Ok(())
}
