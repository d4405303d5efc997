// Built-in spreadsheet functions: names and argument counts

/// Signature of a built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` = variadic
    pub max_args: Option<usize>,
}

impl FunctionSpec {
    const fn fixed(name: &'static str, min_args: usize, max_args: usize) -> Self {
        Self { name, min_args, max_args: Some(max_args) }
    }

    const fn variadic(name: &'static str, min_args: usize) -> Self {
        Self { name, min_args, max_args: None }
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }
}

/// Every function the evaluator implements. This is the single source of truth:
/// the parser rejects names not listed here.
pub const FUNCTIONS: &[FunctionSpec] = &[
    // Aggregates
    FunctionSpec::variadic("SUM", 1),
    FunctionSpec::variadic("AVERAGE", 1),
    FunctionSpec::variadic("MIN", 1),
    FunctionSpec::variadic("MAX", 1),
    FunctionSpec::variadic("COUNT", 1),
    FunctionSpec::variadic("COUNTA", 1),
    FunctionSpec::variadic("PRODUCT", 1),
    // Math
    FunctionSpec::fixed("ABS", 1, 1),
    FunctionSpec::fixed("ROUND", 1, 2),
    // Logic
    FunctionSpec::fixed("IF", 2, 3),
    FunctionSpec::fixed("IFERROR", 2, 2),
    FunctionSpec::variadic("AND", 1),
    FunctionSpec::variadic("OR", 1),
    FunctionSpec::fixed("NOT", 1, 1),
    // Information
    FunctionSpec::fixed("ISERROR", 1, 1),
    FunctionSpec::fixed("ISBLANK", 1, 1),
    // Text
    FunctionSpec::variadic("CONCAT", 1),
    // Lookup
    FunctionSpec::fixed("VLOOKUP", 3, 4),
    FunctionSpec::fixed("HLOOKUP", 3, 4),
];

/// Look up a function by (uppercase) name.
pub fn lookup_function(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Check if a function name is a known built-in function.
/// Function names must be uppercase (as produced by the parser).
pub fn is_known_function(name: &str) -> bool {
    lookup_function(name).is_some()
}
