//! CRD YAML Generator
//!
//! Prints the PrometheusRule CRD understood by the mimir-rules-operator, for
//! clusters that do not already run the Prometheus Operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/prometheusrule.yaml

use mimir_rules_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
