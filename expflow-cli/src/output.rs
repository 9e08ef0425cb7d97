// Terminal output for expflow commands
// Everything here writes to stderr; stdout only carries `--json` results

const BOLD: &str = "1";
const DIM: &str = "2";
const GREEN: &str = "32";
const BOLD_GREEN: &str = "1;32";
const BOLD_RED: &str = "1;31";
const YELLOW: &str = "33";
const BOLD_YELLOW: &str = "1;33";
const CYAN: &str = "36";
const BOLD_CYAN: &str = "1;36";
const BOLD_BLUE: &str = "1;34";

/// Wrap `text` in an ANSI SGR sequence
pub fn paint(code: &str, text: &str) -> String {
    format!("\x1b[{}m{}\x1b[0m", code, text)
}

/// A two-column line with a colored marker: "  ✓ message"
fn marked(code: &str, mark: &str, message: &str) -> String {
    format!("{} {}", paint(code, &format!("  {}", mark)), message)
}

/// Right-aligned action verb, cargo style: "  Running path"
pub fn status_line(action: &str, message: &str) -> String {
    format!("{} {}", paint(BOLD_CYAN, &format!("{:>12}", action)), message)
}

pub fn space_line(space_id: &str) -> String {
    format!("{} '{}'", paint(BOLD_BLUE, "  Space"), space_id)
}

/// Key/value pair produced by a task, nested under its parameter set
pub fn value_line(name: &str, value: &str) -> String {
    format!("        | {} = {}", name, value)
}

pub fn info_line(message: &str) -> String {
    marked(CYAN, "i", message)
}

pub fn error_line(message: &str) -> String {
    format!("{} {}", paint(BOLD_RED, "error:"), message)
}

pub fn dim_line(message: &str) -> String {
    paint(DIM, message)
}

pub fn ok_line(message: &str) -> String {
    paint(GREEN, message)
}

pub fn line(text: &str) {
    eprintln!("{}", text);
}

pub fn blank() {
    eprintln!();
}

pub fn status(action: &str, message: &str) {
    line(&status_line(action, message));
}

pub fn success(message: &str) {
    line(&marked(BOLD_GREEN, "\u{2713}", message));
}

pub fn failure(message: &str) {
    line(&marked(BOLD_RED, "\u{2717}", message));
}

pub fn check(message: &str) {
    line(&marked(GREEN, "\u{2713}", message));
}

pub fn warning(message: &str) {
    line(&marked(YELLOW, "!", message));
}

pub fn error(message: &str) {
    line(&error_line(message));
}

pub fn info(message: &str) {
    line(&info_line(message));
}

pub fn dim(message: &str) {
    line(&dim_line(message));
}

pub fn value(name: &str, value: &str) {
    line(&value_line(name, value));
}

/// Question for an `input()` condition; the answer is typed on the same line
pub fn prompt(message: &str) {
    eprint!("{} {} ", paint(BOLD_YELLOW, "  ?"), message);
}

pub fn header(message: &str) {
    line(&paint(BOLD, &format!("==> {}", message)));
}
