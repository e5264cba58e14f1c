//! Completion values and the builders that produce them.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use lodestone_api::ArgKind;

use crate::argument::kind_suggestions;
use crate::context::CommandContext;

/// Half-open byte range in an input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StringRange {
    pub start: usize,
    pub end: usize,
}

impl StringRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn at(position: usize) -> Self {
        Self::new(position, position)
    }

    /// Smallest range covering both.
    pub fn encompassing(a: StringRange, b: StringRange) -> Self {
        Self::new(a.start.min(b.start), a.end.max(b.end))
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn get<'a>(&self, input: &'a str) -> &'a str {
        input.get(self.start..self.end).unwrap_or("")
    }
}

/// Replacement text for a range of the input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Suggestion {
    pub range: StringRange,
    pub text: String,
    pub tooltip: Option<String>,
}

impl Suggestion {
    pub fn new(range: StringRange, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
            tooltip: None,
        }
    }

    /// The input with this suggestion applied.
    pub fn apply(&self, input: &str) -> String {
        let start = self.range.start.min(input.len());
        let end = self.range.end.min(input.len());
        let mut result = String::with_capacity(input.len() + self.text.len());
        result.push_str(&input[..start]);
        result.push_str(&self.text);
        result.push_str(&input[end..]);
        result
    }

    /// Widen to `range`, copying the surrounding input into the text.
    pub fn expand(&self, command: &str, range: StringRange) -> Suggestion {
        if range == self.range {
            return self.clone();
        }
        let mut text = String::new();
        if range.start < self.range.start {
            text.push_str(StringRange::new(range.start, self.range.start).get(command));
        }
        text.push_str(&self.text);
        if range.end > self.range.end {
            text.push_str(StringRange::new(self.range.end, range.end).get(command));
        }
        Suggestion {
            range,
            text,
            tooltip: self.tooltip.clone(),
        }
    }
}

/// A set of suggestions sharing one range.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Suggestions {
    range: StringRange,
    list: Vec<Suggestion>,
}

impl Suggestions {
    pub fn new(range: StringRange, list: Vec<Suggestion>) -> Self {
        Self { range, list }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn range(&self) -> StringRange {
        self.range
    }

    pub fn list(&self) -> &[Suggestion] {
        &self.list
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Suggested texts, in order.
    pub fn texts(&self) -> Vec<String> {
        self.list.iter().map(|s| s.text.clone()).collect()
    }

    /// Combine suggestion sets over `command` into one.
    pub fn merge(command: &str, input: Vec<Suggestions>) -> Suggestions {
        let all: Vec<Suggestion> = input.into_iter().flat_map(|s| s.list).collect();
        Self::create(command, all)
    }

    /// Expand every suggestion to a shared range, deduplicate and sort.
    pub fn create(command: &str, suggestions: Vec<Suggestion>) -> Suggestions {
        let Some(first) = suggestions.first() else {
            return Suggestions::empty();
        };
        let range = suggestions
            .iter()
            .fold(first.range, |acc, s| StringRange::encompassing(acc, s.range));
        let mut seen = BTreeSet::new();
        let mut list: Vec<Suggestion> = suggestions
            .iter()
            .map(|s| s.expand(command, range))
            .filter(|s| seen.insert(s.text.clone()))
            .collect();
        list.sort_by(|a, b| {
            a.text
                .to_lowercase()
                .cmp(&b.text.to_lowercase())
                .then_with(|| a.text.cmp(&b.text))
        });
        Suggestions { range, list }
    }
}

/// Collects suggestions for the token starting at `start`.
#[derive(Debug, Clone)]
pub struct SuggestionsBuilder {
    input: String,
    start: usize,
    remaining_lower: String,
    result: Vec<Suggestion>,
}

impl SuggestionsBuilder {
    pub fn new(input: impl Into<String>, start: usize) -> Self {
        let input = input.into();
        let start = crate::reader::floor_boundary(&input, start);
        let remaining_lower = input[start..].to_lowercase();
        Self {
            input,
            start,
            remaining_lower,
            result: Vec::new(),
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// The partial token being completed.
    pub fn remaining(&self) -> &str {
        &self.input[self.start..]
    }

    /// Whether `candidate` extends the partial token, ignoring case.
    pub fn matches(&self, candidate: &str) -> bool {
        candidate.to_lowercase().starts_with(&self.remaining_lower)
    }

    /// Add a suggestion unless it equals what is already typed.
    pub fn suggest(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if text != self.remaining() {
            self.result.push(Suggestion::new(
                StringRange::new(self.start, self.input.len()),
                text,
            ));
        }
        self
    }

    pub fn suggest_with_tooltip(
        &mut self,
        text: impl Into<String>,
        tooltip: impl Into<String>,
    ) -> &mut Self {
        let text = text.into();
        if text != self.remaining() {
            let mut suggestion =
                Suggestion::new(StringRange::new(self.start, self.input.len()), text);
            suggestion.tooltip = Some(tooltip.into());
            self.result.push(suggestion);
        }
        self
    }

    /// Suggest each candidate that extends the partial token.
    pub fn suggest_matching<I, S>(&mut self, candidates: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for candidate in candidates {
            let candidate = candidate.into();
            if self.matches(&candidate) {
                self.suggest(candidate);
            }
        }
        self
    }

    /// A fresh builder over the same input starting at `start`.
    pub fn create_offset(&self, start: usize) -> SuggestionsBuilder {
        SuggestionsBuilder::new(self.input.clone(), start)
    }

    pub fn build(&self) -> Suggestions {
        Suggestions::create(&self.input, self.result.clone())
    }

    pub fn build_future(&self) -> BoxFuture<'static, Suggestions> {
        Box::pin(future::ready(self.build()))
    }
}

/// Computes completions for an argument node.
///
/// Nodes carrying a provider are the ones a client must ask the server
/// about.
pub trait SuggestionProvider: Send + Sync {
    fn suggestions(
        &self,
        context: &CommandContext,
        builder: SuggestionsBuilder,
    ) -> BoxFuture<'static, Suggestions>;
}

impl<F> SuggestionProvider for F
where
    F: Fn(&CommandContext, SuggestionsBuilder) -> BoxFuture<'static, Suggestions> + Send + Sync,
{
    fn suggestions(
        &self,
        context: &CommandContext,
        builder: SuggestionsBuilder,
    ) -> BoxFuture<'static, Suggestions> {
        self(context, builder)
    }
}

/// Shared handle to a provider.
pub type SharedProvider = Arc<dyn SuggestionProvider>;

/// Provider that answers synchronously with a list of candidates.
///
/// Candidates not extending the partial token are dropped.
pub fn provider_fn<F>(f: F) -> SharedProvider
where
    F: Fn(&CommandContext, &str) -> Vec<String> + Send + Sync + 'static,
{
    Arc::new(move |context: &CommandContext, mut builder: SuggestionsBuilder| {
        let candidates = f(context, builder.remaining());
        builder.suggest_matching(candidates);
        builder.build_future()
    })
}

/// Provider completing from what the argument kind itself allows.
pub fn kind_provider(kind: &ArgKind) -> SharedProvider {
    let values = kind_suggestions(kind);
    Arc::new(move |_: &CommandContext, mut builder: SuggestionsBuilder| {
        builder.suggest_matching(values.iter().cloned());
        builder.build_future()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_filters_and_sorts() {
        let mut builder = SuggestionsBuilder::new("home set b", 9);
        builder.suggest_matching(["base", "Barn", "cave"]);
        let suggestions = builder.build();
        assert_eq!(suggestions.texts(), vec!["Barn", "base"]);
        assert_eq!(suggestions.range(), StringRange::new(9, 10));
    }

    #[test]
    fn test_builder_skips_exact_match() {
        let mut builder = SuggestionsBuilder::new("home", 0);
        builder.suggest("home");
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_create_offset() {
        let builder = SuggestionsBuilder::new("home set b", 5);
        let offset = builder.create_offset(9);
        assert_eq!(builder.remaining(), "set b");
        assert_eq!(offset.remaining(), "b");
    }

    #[test]
    fn test_merge_expands_ranges() {
        let command = "tp st";
        let a = Suggestions::new(
            StringRange::new(3, 5),
            vec![Suggestion::new(StringRange::new(3, 5), "steve")],
        );
        let b = Suggestions::new(
            StringRange::new(5, 5),
            vec![Suggestion::new(StringRange::new(5, 5), "one")],
        );
        let merged = Suggestions::merge(command, vec![a, b]);
        assert_eq!(merged.range(), StringRange::new(3, 5));
        assert_eq!(merged.texts(), vec!["steve", "stone"]);
    }

    #[test]
    fn test_apply() {
        let suggestion = Suggestion::new(StringRange::new(9, 10), "base");
        assert_eq!(suggestion.apply("home set b"), "home set base");
    }
}
