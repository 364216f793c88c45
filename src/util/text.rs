use std::borrow::Cow;

/// Returns true for bytes that must never reach a terminal or the database
/// from feed-controlled text. Tab, newline and carriage return are allowed.
fn is_unsafe_byte(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}

/// Strips ASCII control characters and ANSI escape sequences from feed text.
///
/// Feed XML is attacker-controlled: a title can embed CSI (`ESC [ ... final`)
/// or OSC (`ESC ] ... BEL|ST`) sequences that would later be replayed when
/// the CLI prints it. Both sequence kinds are dropped whole; any other
/// control byte is dropped on its own.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.bytes().any(is_unsafe_byte) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    // Parameter and intermediate bytes run until a final byte in 0x40..=0x7e
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            c if c.is_ascii() && is_unsafe_byte(c as u8) => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}

/// Normalizes a text value extracted from a feed: control characters are
/// stripped and surrounding whitespace removed.
pub fn clean_field(s: &str) -> String {
    strip_control_chars(s).trim().to_owned()
}
