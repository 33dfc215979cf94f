/// Skip a test if `git` is not on PATH.
#[macro_export]
macro_rules! skip_without_git {
    () => {
        if !cairn::core::rcs::Git::available() {
            eprintln!("SKIPPED: git not found on PATH");
            return;
        }
    };
}

/// Skip a test if `gpg` is not on PATH.
#[macro_export]
macro_rules! skip_without_gpg {
    () => {
        if !cairn::core::cipher::Gpg::available() {
            eprintln!("SKIPPED: gpg not found on PATH");
            return;
        }
    };
}
