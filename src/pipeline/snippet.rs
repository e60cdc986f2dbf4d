//! User shader snippets.
//!
//! A [`Snippet`] injects GLSL at a named [`SnippetHook`]. Each snippet may
//! provide global declarations, code that runs before the default code
//! (`pre`), code that replaces the default code (`replace`) and code that runs
//! after it (`post`). Snippets attached to the same hook are chained: every
//! snippet wraps the previous one, and a snippet with `replace` set cuts the
//! chain so that nothing before it runs.

use std::rc::Rc;

use smallvec::SmallVec;

/// Points in the generated fragment shader where snippets can be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnippetHook {
    /// Declarations placed at global scope of the fragment shader.
    FragmentGlobals,
    /// Wraps the whole fragment processing. Attached to pipelines.
    Fragment,
    /// Wraps the combine code of one layer. Attached to layers.
    LayerFragment,
    /// Wraps the texture lookup of one layer. Attached to layers.
    TextureLookup,
}

impl SnippetHook {
    /// Whether snippets with this hook are attached to a pipeline (as opposed
    /// to a layer).
    #[must_use]
    pub fn is_pipeline_hook(self) -> bool {
        matches!(self, Self::FragmentGlobals | Self::Fragment)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::FragmentGlobals => "fragment-globals",
            Self::Fragment => "fragment",
            Self::LayerFragment => "layer-fragment",
            Self::TextureLookup => "texture-lookup",
        }
    }
}

/// A piece of user GLSL attached to a hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Snippet {
    hook: SnippetHook,
    declarations: Option<String>,
    pre: Option<String>,
    replace: Option<String>,
    post: Option<String>,
}

impl Snippet {
    /// Creates a snippet with the usual pair of declarations and post code.
    #[must_use]
    pub fn new(hook: SnippetHook, declarations: Option<&str>, post: Option<&str>) -> Self {
        Self {
            hook,
            declarations: declarations.map(str::to_owned),
            pre: None,
            replace: None,
            post: post.map(str::to_owned),
        }
    }

    #[must_use]
    pub fn with_declarations(mut self, code: &str) -> Self {
        self.declarations = Some(code.to_owned());
        self
    }

    #[must_use]
    pub fn with_pre(mut self, code: &str) -> Self {
        self.pre = Some(code.to_owned());
        self
    }

    #[must_use]
    pub fn with_replace(mut self, code: &str) -> Self {
        self.replace = Some(code.to_owned());
        self
    }

    #[must_use]
    pub fn with_post(mut self, code: &str) -> Self {
        self.post = Some(code.to_owned());
        self
    }

    #[must_use]
    pub fn hook(&self) -> SnippetHook {
        self.hook
    }

    #[must_use]
    pub fn declarations(&self) -> Option<&str> {
        self.declarations.as_deref()
    }

    #[must_use]
    pub fn pre(&self) -> Option<&str> {
        self.pre.as_deref()
    }

    #[must_use]
    pub fn replace(&self) -> Option<&str> {
        self.replace.as_deref()
    }

    #[must_use]
    pub fn post(&self) -> Option<&str> {
        self.post.as_deref()
    }
}

/// Ordered snippets attached to a pipeline or a layer. Compared by value.
pub type SnippetList = SmallVec<[Rc<Snippet>; 2]>;

/// Iterates the snippets of `list` that belong to `hook`.
pub fn snippets_for_hook(
    list: &SnippetList,
    hook: SnippetHook,
) -> impl DoubleEndedIterator<Item = &Rc<Snippet>> + '_ {
    list.iter().filter(move |s| s.hook() == hook)
}

/// Whether any snippet for `hook` replaces the default code.
#[must_use]
pub fn has_replace_hook(list: &SnippetList, hook: SnippetHook) -> bool {
    snippets_for_hook(list, hook).any(|s| s.replace().is_some())
}
