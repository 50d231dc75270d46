use parley::{FontContext, FontStack, Layout, LayoutContext, StyleProperty};

/// Measures the rendered width of a run of text in pixels.
pub trait TextMeasure {
    fn text_width(&mut self, text: &str) -> f32;
}

/// Shapes text with `parley` using the same font stack and size the painter uses.
pub struct FontMeasure {
    font_ctx: FontContext,
    layout_ctx: LayoutContext<()>,
    font_stack: String,
    font_size: f32,
}

impl FontMeasure {
    #[must_use]
    pub fn new(font_ctx: FontContext, font_stack: impl Into<String>, font_size: f32) -> Self {
        Self {
            font_ctx,
            layout_ctx: LayoutContext::new(),
            font_stack: font_stack.into(),
            font_size,
        }
    }

    /// Hand the font context back so the painter can reuse the registered fonts.
    #[must_use]
    pub fn into_font_context(self) -> FontContext {
        self.font_ctx
    }
}

impl TextMeasure for FontMeasure {
    fn text_width(&mut self, text: &str) -> f32 {
        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(StyleProperty::FontStack(FontStack::from(
            self.font_stack.as_str(),
        )));
        builder.push_default(StyleProperty::FontSize(self.font_size));

        let mut layout: Layout<()> = builder.build(text);
        layout.break_all_lines(None);
        layout.width()
    }
}

/// Greedy word wrap.
///
/// Words are appended to the current line while `current + word` measures no
/// wider than `max_width`. The last line is always emitted, so empty input
/// yields a single empty line and a first word that does not fit yields a
/// leading empty line. Words are never broken.
pub fn wrap_words<M>(text: &str, max_width: f32, measure: &mut M) -> Vec<String>
where
    M: TextMeasure + ?Sized,
{
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = format!("{current}{word}");
        if measure.text_width(&candidate) <= max_width {
            current = candidate;
            current.push(' ');
        } else {
            lines.push(current.trim_end().to_owned());
            current = format!("{word} ");
        }
    }
    lines.push(current.trim_end().to_owned());

    lines
}

#[cfg(test)]
mod tests {
    use std::{error::Error as StdError, result::Result as StdResult};

    use super::*;
    type TestResult<T = ()> = StdResult<T, Box<dyn StdError>>;

    /// Every character advances by the same amount.
    struct FixedAdvance(f32);

    impl TextMeasure for FixedAdvance {
        fn text_width(&mut self, text: &str) -> f32 {
            text.chars().map(|_| self.0).sum()
        }
    }

    fn expect_wrap(text: &str, max_width: f32, expected: &[&str]) -> TestResult {
        let lines = wrap_words(text, max_width, &mut FixedAdvance(10.0));
        if lines != expected {
            return Err(format!(
                "wrapping {text:?} at {max_width}: expected {expected:?}, got {lines:?}"
            )
            .into());
        }
        Ok(())
    }

    #[test]
    fn short_text_stays_on_one_line() -> TestResult {
        expect_wrap("a cat sitting on a mat", 492.0, &["a cat sitting on a mat"])
    }

    #[test]
    fn long_text_breaks_at_word_boundaries() -> TestResult {
        expect_wrap("aaaa bbbb cccc", 50.0, &["aaaa", "bbbb", "cccc"])?;
        expect_wrap("aa bb cc dd", 50.0, &["aa bb", "cc dd"])
    }

    #[test]
    fn candidate_exactly_at_limit_fits() -> TestResult {
        // "abc de" is 6 chars wide.
        expect_wrap("abc de fg", 60.0, &["abc de", "fg"])
    }

    #[test]
    fn empty_and_blank_text_yield_one_empty_line() -> TestResult {
        expect_wrap("", 100.0, &[""])?;
        expect_wrap(" \t\n ", 100.0, &[""])
    }

    #[test]
    fn oversized_first_word_leaves_leading_empty_line() -> TestResult {
        expect_wrap("toolongword ok", 50.0, &["", "toolongword", "ok"])
    }

    #[test]
    fn surrounding_whitespace_is_collapsed() -> TestResult {
        expect_wrap("  one   two  ", 500.0, &["one two"])
    }
}
