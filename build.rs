use std::process::Command;

/// Run a command and return its trimmed stdout when it succeeds.
fn capture(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn build_timestamp() -> String {
    // Reproducible builds pin the clock.
    if let Ok(epoch) = std::env::var("SOURCE_DATE_EPOCH") {
        let at = format!("@{epoch}");
        if let Some(stamp) = capture("date", &["-u", "-d", &at, "+%Y-%m-%dT%H:%M:%SZ"]) {
            return stamp;
        }
    }
    capture("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"])
        .or_else(|| {
            capture(
                "powershell",
                &[
                    "-NoProfile",
                    "-Command",
                    "(Get-Date).ToUniversalTime().ToString('yyyy-MM-ddTHH:mm:ssZ')",
                ],
            )
        })
        .unwrap_or_else(|| "unknown".into())
}

fn main() {
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp());

    let git_sha = capture("git", &["describe", "--always", "--dirty", "--abbrev=8"])
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BUILD_GIT_SHA={git_sha}");

    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");
}
