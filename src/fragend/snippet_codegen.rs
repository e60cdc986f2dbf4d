//! Wrapping generated functions in snippet hooks.
//!
//! Every hook point is a named function (`final_name`) that the rest of the
//! shader calls. Without snippets it simply forwards to the built-in
//! implementation (`chain_function`). Each snippet adds one function around
//! the previous one, so the last snippet attached is the outermost. A snippet
//! with replacement code cuts the chain: earlier snippets for the same hook,
//! and the built-in implementation, are never called.

use std::fmt::Write;

use crate::pipeline::{SnippetHook, SnippetList};

pub(crate) struct HookFunction<'a> {
    pub hook: SnippetHook,
    /// Built-in implementation called by the innermost wrapper.
    pub chain_function: &'a str,
    /// Name callers use.
    pub final_name: &'a str,
    /// Prefix of the intermediate wrapper functions.
    pub function_prefix: &'a str,
    /// `None` for `void` functions.
    pub return_type: Option<&'a str>,
    pub return_variable: &'a str,
    pub arguments: &'a str,
    pub argument_declarations: &'a str,
}

impl HookFunction<'_> {
    pub(crate) fn write(&self, out: &mut String, snippets: &SnippetList) {
        let hooked: Vec<_> = snippets.iter().filter(|s| s.hook() == self.hook).collect();

        // Snippets before the last replacement are unreachable.
        let first = hooked
            .iter()
            .rposition(|s| s.replace().is_some())
            .unwrap_or(0);
        let chain = &hooked[first..];

        if chain.is_empty() {
            self.write_stub(out);
            return;
        }

        for (num, snippet) in chain.iter().enumerate() {
            if let Some(declarations) = snippet.declarations() {
                out.push_str(declarations);
            }

            let _ = writeln!(out, "\n{}", self.return_type.unwrap_or("void"));
            if num + 1 < chain.len() {
                let _ = write!(out, "{}_{num}", self.function_prefix);
            } else {
                out.push_str(self.final_name);
            }
            let _ = write!(out, " ({})\n{{\n", self.argument_declarations);

            if let Some(return_type) = self.return_type {
                let _ = write!(out, "  {return_type} {};\n\n", self.return_variable);
            }

            if let Some(pre) = snippet.pre() {
                out.push_str(pre);
            }

            if let Some(replace) = snippet.replace() {
                out.push_str(replace);
            } else {
                out.push_str("  ");
                if self.return_type.is_some() {
                    let _ = write!(out, "{} = ", self.return_variable);
                }
                if num > 0 {
                    let _ = write!(out, "{}_{}", self.function_prefix, num - 1);
                } else {
                    out.push_str(self.chain_function);
                }
                let _ = writeln!(out, " ({});", self.arguments);
            }

            if let Some(post) = snippet.post() {
                out.push_str(post);
            }

            if self.return_type.is_some() {
                let _ = writeln!(out, "  return {};", self.return_variable);
            }
            out.push_str("}\n");
        }
    }

    fn write_stub(&self, out: &mut String) {
        match self.return_type {
            Some(return_type) => {
                let _ = write!(
                    out,
                    "\n{return_type}\n{} ({})\n{{\n  return {} ({});\n}}\n",
                    self.final_name, self.argument_declarations, self.chain_function, self.arguments
                );
            }
            None => {
                let _ = write!(
                    out,
                    "\nvoid\n{} ({})\n{{\n  {} ({});\n}}\n",
                    self.final_name, self.argument_declarations, self.chain_function, self.arguments
                );
            }
        }
    }
}

/// Appends the declarations of every snippet for `hook`, in order.
pub(crate) fn write_declarations(out: &mut String, hook: SnippetHook, snippets: &SnippetList) {
    for snippet in snippets.iter().filter(|s| s.hook() == hook) {
        if let Some(declarations) = snippet.declarations() {
            out.push_str(declarations);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::pipeline::Snippet;

    fn layer_hook<'a>() -> HookFunction<'a> {
        HookFunction {
            hook: SnippetHook::LayerFragment,
            chain_function: "cg_real_generate_layer0",
            final_name: "cg_generate_layer0",
            function_prefix: "cg_generate_layer0",
            return_type: Some("vec4"),
            return_variable: "cg_layer",
            arguments: "",
            argument_declarations: "",
        }
    }

    #[test]
    fn stub_forwards_to_chain() {
        let mut out = String::new();
        layer_hook().write(&mut out, &SnippetList::new());
        assert_eq!(
            out,
            "\nvec4\ncg_generate_layer0 ()\n{\n  return cg_real_generate_layer0 ();\n}\n"
        );
    }

    #[test]
    fn void_stub() {
        let hook = HookFunction {
            hook: SnippetHook::Fragment,
            chain_function: "cg_generated_source",
            final_name: "main",
            function_prefix: "cg_fragment_hook",
            return_type: None,
            return_variable: "",
            arguments: "",
            argument_declarations: "",
        };
        let mut out = String::new();
        hook.write(&mut out, &SnippetList::new());
        assert_eq!(out, "\nvoid\nmain ()\n{\n  cg_generated_source ();\n}\n");
    }

    #[test]
    fn snippets_chain_in_order() {
        let snippets: SnippetList = [
            Rc::new(Snippet::new(SnippetHook::LayerFragment, Some("uniform float a;\n"), Some("  A;\n"))),
            Rc::new(Snippet::new(SnippetHook::TextureLookup, None, Some("  ignored;\n"))),
            Rc::new(Snippet::new(SnippetHook::LayerFragment, None, Some("  B;\n"))),
        ]
        .into_iter()
        .collect();

        let mut out = String::new();
        layer_hook().write(&mut out, &snippets);

        assert!(out.starts_with("uniform float a;\n\nvec4\ncg_generate_layer0_0 ()\n{\n"));
        assert!(out.contains("  cg_layer = cg_real_generate_layer0 ();\n  A;\n"));
        assert!(out.contains("\nvec4\ncg_generate_layer0 ()\n{\n  vec4 cg_layer;\n\n"));
        assert!(out.contains("  cg_layer = cg_generate_layer0_0 ();\n  B;\n  return cg_layer;\n}\n"));
        assert!(!out.contains("ignored"));
    }

    #[test]
    fn replace_cuts_the_chain() {
        let snippets: SnippetList = [
            Rc::new(Snippet::new(SnippetHook::LayerFragment, None, Some("  EARLIER;\n"))),
            Rc::new(
                Snippet::new(SnippetHook::LayerFragment, None, None)
                    .with_replace("  cg_layer = vec4 (1.0);\n"),
            ),
        ]
        .into_iter()
        .collect();

        let mut out = String::new();
        layer_hook().write(&mut out, &snippets);

        assert!(!out.contains("EARLIER"));
        assert!(!out.contains("cg_real_generate_layer0"));
        assert!(out.contains("cg_generate_layer0 ()\n{\n  vec4 cg_layer;\n\n  cg_layer = vec4 (1.0);\n"));
    }

    #[test]
    fn declarations_for_hook_only() {
        let snippets: SnippetList = [
            Rc::new(Snippet::new(SnippetHook::FragmentGlobals, Some("float g;\n"), None)),
            Rc::new(Snippet::new(SnippetHook::Fragment, Some("float f;\n"), None)),
        ]
        .into_iter()
        .collect();

        let mut out = String::new();
        write_declarations(&mut out, SnippetHook::FragmentGlobals, &snippets);
        assert_eq!(out, "float g;\n");
    }
}
