pub fn print_startup_banner() {
    // ANSI color codes
    let cyan = "\x1B[38;5;45m";
    let gray = "\x1B[38;5;245m";
    let reset = "\x1B[0m";

    println!(
        r#"
  {cyan}                 __                  __
   _____ ____ _ / /_ ___   ____ _ ____ _ / /_ ___
  / ___// __ `// __// _ \ / __ `// __ `// __// _ \
 / /   / /_/ // /_ /  __// /_/ // /_/ // /_ /  __/
/_/    \__,_/ \__/ \___/ \__, / \__,_/ \__/ \___/
                        /____/
  {gray}one upstream call per key per window{reset}

         {cyan}rategate v{version}{reset}
"#,
        cyan = cyan,
        gray = gray,
        reset = reset,
        version = env!("CARGO_PKG_VERSION"),
    );
}
