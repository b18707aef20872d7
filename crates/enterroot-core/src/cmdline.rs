//! Kernel command line inspection.

use std::path::Path;

use enterroot_common::constants::PROC_CMDLINE;

/// Returns whether `word` appears as a whole word on the kernel command line.
///
/// An unreadable command line counts as not containing the word.
pub fn kernel_cmdline_contains(word: &str) -> bool {
    cmdline_file_contains(Path::new(PROC_CMDLINE), word)
}

fn cmdline_file_contains(path: &Path, word: &str) -> bool {
    std::fs::read_to_string(path).is_ok_and(|cmdline| contains_word(&cmdline, word))
}

fn contains_word(cmdline: &str, word: &str) -> bool {
    !word.is_empty() && cmdline.split_whitespace().any(|w| w == word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_words_only() {
        let cmdline = "console=ttyS0 k3os.debug quiet\n";
        assert!(contains_word(cmdline, "k3os.debug"));
        assert!(!contains_word(cmdline, "k3os"));
        assert!(!contains_word(cmdline, "debug"));
    }

    #[test]
    fn empty_word_never_matches() {
        assert!(!contains_word("a b c", ""));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join("cmdline");
        std::fs::write(&path, "root=/dev/vda rd.debug\n").expect("write failed");
        assert!(cmdline_file_contains(&path, "rd.debug"));
        assert!(!cmdline_file_contains(&dir.path().join("missing"), "rd.debug"));
    }
}
