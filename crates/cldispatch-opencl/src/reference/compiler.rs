//! Front-end for the reference runtime's "compiler".
//!
//! The reference device does not generate code. It validates OpenCL C source
//! far enough to recover kernel signatures (entry-point names and parameter
//! kinds) and reports problems as clang-style `line:col: error:` diagnostics,
//! which become the program's build log.

use crate::kernel::ScalarType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    /// `__global` or `__constant` pointer.
    Buffer { read_only: bool },
    /// By-value scalar.
    Scalar(ScalarType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Param {
    pub name: String,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelSignature {
    pub name: String,
    pub params: Vec<Param>,
}

#[derive(Debug, Default)]
pub(crate) struct Compilation {
    pub kernels: Vec<KernelSignature>,
    pub diagnostics: Vec<String>,
}

impl Compilation {
    pub fn succeeded(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn log(&self) -> String {
        self.diagnostics.join("\n")
    }
}

struct Diagnostics<'a> {
    source: &'a str,
    lines: Vec<String>,
}

impl<'a> Diagnostics<'a> {
    fn error(&mut self, offset: usize, msg: impl AsRef<str>) {
        let (line, col) = line_col(self.source, offset);
        self.lines.push(format!("{line}:{col}: error: {}", msg.as_ref()));
    }
}

/// Compile `source`. `has_impl` reports whether a host implementation exists
/// for a kernel name.
pub(crate) fn compile(source: &str, has_impl: impl Fn(&str) -> bool) -> Compilation {
    let mut diags = Diagnostics { source, lines: Vec::new() };

    if source.trim().is_empty() {
        diags.error(0, "empty program source");
        return Compilation { kernels: Vec::new(), diagnostics: diags.lines };
    }

    let stripped = strip_comments(source, &mut diags);
    check_balance(&stripped, &mut diags);

    let mut kernels: Vec<KernelSignature> = Vec::new();
    for (signature, offset) in find_kernels(&stripped, &mut diags) {
        if kernels.iter().any(|k| k.name == signature.name) {
            diags.error(offset, format!("redefinition of kernel '{}'", signature.name));
            continue;
        }
        if !has_impl(&signature.name) {
            diags.error(
                offset,
                format!("no host implementation registered for kernel '{}'", signature.name),
            );
        }
        kernels.push(signature);
    }

    Compilation { kernels, diagnostics: diags.lines }
}

fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let prefix = source.get(..offset).unwrap_or(source);
    let line = prefix.matches('\n').count() + 1;
    let col = prefix.rfind('\n').map_or(prefix.len(), |nl| prefix.len() - nl - 1) + 1;
    (line, col)
}

/// Replace comments with spaces, keeping newlines so offsets stay valid.
fn strip_comments(source: &str, diags: &mut Diagnostics<'_>) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                out.push(b' ');
                i += 1;
            }
        } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let start = i;
            out.extend_from_slice(b"  ");
            i += 2;
            loop {
                if i >= bytes.len() {
                    diags.error(start, "unterminated /* comment");
                    break;
                }
                if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    out.extend_from_slice(b"  ");
                    i += 2;
                    break;
                }
                out.push(if bytes[i] == b'\n' { b'\n' } else { b' ' });
                i += 1;
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    // Comment bytes became ASCII spaces, so the result is still valid UTF-8.
    String::from_utf8(out).unwrap_or_default()
}

fn check_balance(source: &str, diags: &mut Diagnostics<'_>) {
    let mut stack: Vec<(u8, usize)> = Vec::new();
    for (offset, b) in source.bytes().enumerate() {
        match b {
            b'{' | b'(' | b'[' => stack.push((b, offset)),
            b'}' | b')' | b']' => {
                let open = match b {
                    b'}' => b'{',
                    b')' => b'(',
                    _ => b'[',
                };
                match stack.pop() {
                    Some((o, _)) if o == open => {}
                    _ => {
                        diags.error(offset, format!("unexpected '{}'", b as char));
                        return;
                    }
                }
            }
            _ => {}
        }
    }
    if let Some((open, offset)) = stack.pop() {
        let close = match open {
            b'{' => '}',
            b'(' => ')',
            _ => ']',
        };
        diags.error(offset, format!("expected '{close}' to match this '{}'", open as char));
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Next identifier at or after `from`, as a byte range.
fn next_word(source: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = source.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if is_ident_start(bytes[i]) && (i == 0 || !is_ident(bytes[i - 1])) {
            let start = i;
            while i < bytes.len() && is_ident(bytes[i]) {
                i += 1;
            }
            return Some((start, i));
        }
        i += 1;
    }
    None
}

fn skip_ws(source: &str, from: usize) -> usize {
    let bytes = source.as_bytes();
    let mut i = from;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn matching_paren(source: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in source.bytes().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Like [`next_word`], but steps over `__attribute__((...))` groups.
fn next_word_skipping_attributes(source: &str, from: usize) -> Option<(usize, usize)> {
    let mut pos = from;
    loop {
        let (start, end) = next_word(source, pos)?;
        if !matches!(&source[start..end], "__attribute__" | "__attribute") {
            return Some((start, end));
        }
        let open = skip_ws(source, end);
        if source.as_bytes().get(open) != Some(&b'(') {
            return Some((start, end));
        }
        pos = matching_paren(source, open)? + 1;
    }
}

fn find_kernels(source: &str, diags: &mut Diagnostics<'_>) -> Vec<(KernelSignature, usize)> {
    let bytes = source.as_bytes();
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some((start, end)) = next_word(source, pos) {
        pos = end;
        let word = &source[start..end];
        if word != "__kernel" && word != "kernel" {
            continue;
        }

        let Some((vs, ve)) = next_word_skipping_attributes(source, end) else {
            diags.error(start, "expected return type after kernel qualifier");
            break;
        };
        if &source[vs..ve] != "void" {
            diags.error(vs, "kernel functions must have void return type");
            pos = ve;
            continue;
        }

        let Some((ns, ne)) = next_word_skipping_attributes(source, ve) else {
            diags.error(ve, "expected kernel name");
            break;
        };
        let name = &source[ns..ne];

        let open = skip_ws(source, ne);
        if bytes.get(open) != Some(&b'(') {
            diags.error(open, format!("expected '(' after kernel name '{name}'"));
            pos = ne;
            continue;
        }
        let Some(close) = matching_paren(source, open) else {
            // Unbalanced parentheses were already reported.
            break;
        };
        pos = close + 1;

        let params = parse_params(&source[open + 1..close], open + 1, diags);
        if bytes.get(skip_ws(source, close + 1)) != Some(&b'{') {
            // Prototype only; the definition carries the entry point.
            continue;
        }
        found.push((KernelSignature { name: name.to_string(), params }, ns));
    }

    found
}

fn parse_params(list: &str, base: usize, diags: &mut Diagnostics<'_>) -> Vec<Param> {
    let trimmed = list.trim();
    if trimmed.is_empty() || trimmed == "void" {
        return Vec::new();
    }

    let mut params = Vec::new();
    let mut offset = base;
    for raw in list.split(',') {
        let at = offset + (raw.len() - raw.trim_start().len());
        offset += raw.len() + 1;

        let spaced = raw.replace('*', " * ");
        let tokens: Vec<&str> = spaced.split_whitespace().collect();
        let Some((&name, qualifiers)) = tokens.split_last() else {
            diags.error(at, "expected parameter declaration");
            continue;
        };
        if name == "*" || !name.bytes().all(is_ident) {
            diags.error(at, "expected parameter name");
            continue;
        }

        let is_pointer = qualifiers.contains(&"*");
        let has = |q: &[&str]| qualifiers.iter().any(|t| q.contains(t));
        let kind = if is_pointer {
            if has(&["__local", "local"]) {
                diags.error(at, format!("local memory parameter '{name}' is not supported"));
                continue;
            } else if has(&["__constant", "constant"]) {
                ParamKind::Buffer { read_only: true }
            } else if has(&["__global", "global"]) {
                ParamKind::Buffer { read_only: has(&["const"]) }
            } else {
                diags.error(
                    at,
                    format!("pointer parameter '{name}' must be in the global address space"),
                );
                continue;
            }
        } else {
            let ty: Vec<&str> = qualifiers
                .iter()
                .copied()
                .filter(|t| !matches!(*t, "const" | "__private" | "private"))
                .collect();
            let ty = ty.join(" ");
            match ScalarType::from_cl_name(&ty) {
                Some(scalar) => ParamKind::Scalar(scalar),
                None => {
                    diags.error(at, format!("unsupported parameter type '{ty}' for '{name}'"));
                    continue;
                }
            }
        };
        params.push(Param { name: name.to_string(), kind });
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::ADD_SOURCE;

    fn compile_all(src: &str) -> Compilation {
        compile(src, |_| true)
    }

    #[test]
    fn add_kernel_signature() {
        let c = compile_all(ADD_SOURCE);
        assert!(c.succeeded(), "{}", c.log());
        assert_eq!(c.kernels.len(), 1);
        let k = &c.kernels[0];
        assert_eq!(k.name, "simple_add");
        let kinds: Vec<ParamKind> = k.params.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParamKind::Buffer { read_only: true },
                ParamKind::Buffer { read_only: true },
                ParamKind::Buffer { read_only: false },
                ParamKind::Scalar(ScalarType::Int),
            ]
        );
        assert_eq!(k.params[3].name, "count");
    }

    #[test]
    fn multiple_kernels_and_comments() {
        let src = r#"
            /* kernel void hidden(global int* a) {} */
            kernel void scale(global float* data, const float factor) { }
            // __kernel void also_hidden() {}
            __kernel void fill(__global uint* out, ulong n) { }
        "#;
        let c = compile_all(src);
        assert!(c.succeeded(), "{}", c.log());
        let names: Vec<&str> = c.kernels.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["scale", "fill"]);
        assert_eq!(c.kernels[0].params[1].kind, ParamKind::Scalar(ScalarType::Float));
        assert_eq!(c.kernels[1].params[1].kind, ParamKind::Scalar(ScalarType::ULong));
    }

    #[test]
    fn void_parameter_list_is_empty() {
        let c = compile_all("kernel void noop(void) {}");
        assert!(c.succeeded());
        assert!(c.kernels[0].params.is_empty());
    }

    #[test]
    fn missing_brace_is_reported_with_position() {
        let c = compile_all("__kernel void broken(__global int* a) {\n    a[0] = 1;\n");
        assert!(!c.succeeded());
        assert!(c.log().starts_with("1:39: error:"), "{}", c.log());
        assert!(c.log().contains("expected '}'"));
    }

    #[test]
    fn stray_closing_brace() {
        let c = compile_all("kernel void k(global int* a) { } }");
        assert!(c.log().contains("unexpected '}'"));
    }

    #[test]
    fn non_void_kernel_rejected() {
        let c = compile_all("kernel int k(global int* a) { return 0; }");
        assert!(c.log().contains("void return type"));
    }

    #[test]
    fn attributes_before_and_after_return_type() {
        let src = "__kernel __attribute__((reqd_work_group_size(1, 1, 1))) void k(__global int* a) { }\n\
                   kernel void __attribute__((vec_type_hint(int))) j(global int* b) { }";
        let c = compile_all(src);
        assert!(c.succeeded(), "{}", c.log());
        let names: Vec<&str> = c.kernels.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["k", "j"]);
        assert_eq!(c.kernels[0].params[0].kind, ParamKind::Buffer { read_only: false });
    }

    #[test]
    fn unsupported_parameter_type() {
        let c = compile_all("kernel void k(global int* a, half h) { }");
        assert!(c.log().contains("unsupported parameter type 'half'"));
    }

    #[test]
    fn local_and_private_pointers_rejected() {
        let c = compile_all("kernel void k(local int* scratch, int* p) { }");
        assert_eq!(c.diagnostics.len(), 2, "{}", c.log());
        assert!(c.log().contains("local memory parameter 'scratch'"));
        assert!(c.log().contains("global address space"));
    }

    #[test]
    fn missing_host_implementation() {
        let c = compile(ADD_SOURCE, |name| name != "simple_add");
        assert!(c.log().contains("no host implementation registered for kernel 'simple_add'"));
    }

    #[test]
    fn redefinition_reported() {
        let c = compile_all("kernel void k() { }\nkernel void k() { }");
        assert!(c.log().contains("2:13: error: redefinition of kernel 'k'"), "{}", c.log());
    }

    #[test]
    fn empty_source() {
        let c = compile_all("   \n");
        assert_eq!(c.log(), "1:1: error: empty program source");
    }

    #[test]
    fn unterminated_comment() {
        let c = compile_all("kernel void k() { } /* trailing");
        assert!(c.log().contains("unterminated /* comment"));
    }

    #[test]
    fn prototypes_are_not_entry_points() {
        let c = compile_all("kernel void k(global int* a);\nkernel void k(global int* a) { }");
        assert!(c.succeeded(), "{}", c.log());
        assert_eq!(c.kernels.len(), 1);
    }

    #[test]
    fn line_col_counts_from_one() {
        assert_eq!(line_col("ab\ncd", 0), (1, 1));
        assert_eq!(line_col("ab\ncd", 4), (2, 2));
    }
}
