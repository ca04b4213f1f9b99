/// One candidate entry point found while scanning a library's dynamic
/// symbol table.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Mangled name, exactly as it appears in `.dynstr`.
    pub name: String,
    /// Demangled form used for pattern matching and parameter counting.
    pub demangled: String,
    /// Address relative to the library's mapped base.
    pub offset: usize,
    /// Best-effort parameter count derived from the demangled signature.
    pub param_count: usize,
}
