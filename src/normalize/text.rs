use std::borrow::Cow;

/// Canonicalize Unicode spacing, punctuation, and conjoining Hangul jamo.
///
/// Returns the input unchanged (borrowed) when nothing needs rewriting.
/// Applying it twice gives the same result as applying it once.
pub fn normalize_text(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|ch| replacement(ch).is_some()) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match replacement(ch) {
            Some(Replacement::Drop) => {}
            Some(Replacement::Char(to)) => out.push(to),
            Some(Replacement::Str(to)) => out.push_str(to),
            None => out.push(ch),
        }
    }
    Cow::Owned(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replacement {
    Drop,
    Char(char),
    Str(&'static str),
}

/// Compatibility jamo for choseong U+1100..=U+1112.
const CHOSEONG: [char; 19] = [
    'ㄱ', 'ㄲ', 'ㄴ', 'ㄷ', 'ㄸ', 'ㄹ', 'ㅁ', 'ㅂ', 'ㅃ', 'ㅅ', 'ㅆ', 'ㅇ', 'ㅈ', 'ㅉ', 'ㅊ', 'ㅋ', 'ㅌ', 'ㅍ', 'ㅎ',
];

fn replacement(ch: char) -> Option<Replacement> {
    use Replacement::{Char, Drop, Str};

    let to = match ch {
        // spaces
        '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{3000}' => Char(' '),
        '\u{1680}' => Char('_'),
        '\u{2061}'..='\u{2064}' => Drop,

        // punctuation
        '\u{2010}'..='\u{2015}' | '\u{203E}' | '\u{2043}' => Char('-'),
        '\u{2018}'..='\u{201B}' => Char('\''),
        '\u{201C}'..='\u{201F}' | '\u{301D}' | '\u{301E}' => Char('"'),
        '\u{2024}' => Char('.'),
        '\u{2025}' => Str(".."),
        '\u{2026}' => Str("..."),
        '\u{203C}' => Str("!!"),
        '\u{2044}' => Char('/'),
        '\u{2047}' => Str("??"),
        '\u{2053}' | '\u{301C}' => Char('~'),

        // Hangul conjoining jamo
        '\u{115F}' | '\u{1160}' => Drop,
        '\u{1100}'..='\u{1112}' => Char(CHOSEONG[(ch as u32 - 0x1100) as usize]),
        '\u{1161}'..='\u{1175}' => Char(char::from_u32(ch as u32 - 0x1161 + 0x314F)?),

        _ => return None,
    };
    Some(to)
}
