use randbattery_core::{ParameterKind, ParameterSpec};

fn describe(spec: &ParameterSpec) -> String {
    let default = match (spec.default, spec.kind) {
        (Some(d), ParameterKind::Integer) => format!("{}", d as u64),
        (Some(d), ParameterKind::Real) => format!("{d:.prec$}", prec = spec.precision),
        (None, _) => "required".to_string(),
    };
    format!(
        "{:<20} {:<8} default {:<10} range [{}, {}]  {}",
        spec.name,
        spec.kind.to_string(),
        default,
        spec.min,
        spec.max,
        spec.description
    )
}

pub fn run() {
    let registry = randbattery_tests::registry();
    println!("{} test families:\n", registry.len());
    for entry in registry {
        println!("  {:<26} {}", entry.info.name, entry.info.description);
        for spec in entry.info.parameters {
            println!("      {}", describe(spec));
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_defaults_print_without_fraction() {
        let spec = ParameterSpec::integer("block_length", "block length", 128, 2, 1024);
        let line = describe(&spec);
        assert!(line.contains("default 128"));
        assert!(line.contains("integer"));
    }
}
