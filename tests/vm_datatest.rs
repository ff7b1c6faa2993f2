use datatest_stable::Utf8Path;
use monkey::{parse, Compiler, Globals, Vm};

#[derive(thiserror::Error, Debug)]
#[error("mismatch in datatest at {0}")]
pub struct DatatestError(Box<Utf8Path>);

/// A datatest file is
///
/// ```text
/// <expected errors, one per line>
/// ---
/// <expected output>
/// ---
/// <source>
/// ```
///
/// Lines starting with `//` before the source are comments.
struct Datatest<'a> {
    comments: Vec<&'a str>,
    errors: Vec<&'a str>,
    output: Vec<&'a str>,
    source: String,
}

fn read_datatest(contents: &str) -> Datatest {
    #[derive(PartialEq, Eq, Debug, Default)]
    enum Section {
        #[default]
        Error,
        Output,
        Source,
    }

    let mut test = Datatest {
        comments: vec![],
        errors: vec![],
        output: vec![],
        source: String::new(),
    };
    let mut section = Section::default();

    for line in contents.lines() {
        if section != Section::Source && line.trim_start().starts_with("//") {
            test.comments.push(line);
            continue;
        }

        match section {
            Section::Error if line.trim_end() == "---" => section = Section::Output,
            Section::Error => test.errors.push(line),
            Section::Output if line.trim_end() == "---" => section = Section::Source,
            Section::Output => test.output.push(line),
            Section::Source => {
                if !test.source.is_empty() {
                    test.source.push('\n');
                }
                test.source.push_str(line);
            }
        }
    }

    test
}

// comments are moved to the top when a file is rewritten
fn stitch_to_datatest(test: &Datatest, errors: &[String], output: &[String]) -> String {
    let mut lines: Vec<&str> = test.comments.clone();
    lines.extend(errors.iter().map(String::as_str));
    lines.push("---");
    lines.extend(output.iter().map(String::as_str));
    lines.push("---");
    lines.push(&test.source);
    let mut stitched = lines.join("\n");
    stitched.push('\n');
    stitched
}

fn lines_match(expected: &[&str], got: &[String]) -> bool {
    expected.len() == got.len()
        && expected
            .iter()
            .zip(got)
            .all(|(expected, got)| expected.trim() == got.trim())
}

fn check_datatest(
    path: &Utf8Path,
    test: &Datatest,
    errors: Vec<String>,
    output: Vec<String>,
) -> datatest_stable::Result<()> {
    if std::env::var("DATATEST_EXPECT").is_ok() {
        std::fs::write(path, stitch_to_datatest(test, &errors, &output))?;
        return Ok(());
    }

    let mut failed = false;
    if !lines_match(&test.errors, &errors) {
        println!(
            "error in {path}: error mismatch\n\nGot:\n{}\n\nExpected:\n{}",
            errors.join("\n"),
            test.errors.join("\n")
        );
        failed = true;
    }
    if !lines_match(&test.output, &output) {
        println!(
            "error in {path}: output mismatch\n\nGot:\n{}\n\nExpected:\n{}",
            output.join("\n"),
            test.output.join("\n")
        );
        failed = true;
    }

    if failed {
        Err(DatatestError(Box::from(path)))?
    } else {
        Ok(())
    }
}

/// Parses and compiles, returning either the compiler or the error lines.
fn compile_source(source: &str) -> Result<Compiler, Vec<String>> {
    let parsed = parse(source);
    if !parsed.errors().is_empty() {
        return Err(parsed
            .errors()
            .iter()
            .map(|err| format!("[{:?}] {err}", err.span()))
            .collect());
    }

    let mut compiler = Compiler::new();
    match compiler.compile(parsed.program()) {
        Ok(()) => Ok(compiler),
        Err(err) => Err(vec![format!("compile error: {err}")]),
    }
}

fn vm_test(path: &Utf8Path, contents: String) -> datatest_stable::Result<()> {
    let test = read_datatest(&contents);

    let (errors, output): (Vec<String>, Vec<String>) = match compile_source(&test.source) {
        Err(errors) => (errors, vec![]),
        Ok(compiler) => {
            let bytecode = compiler.bytecode();
            let mut globals = Globals::new();
            let mut vm = Vm::new(&bytecode, &mut globals);
            match vm.run() {
                Err(err) => (vec![format!("runtime error: {err}")], vec![]),
                Ok(()) => (
                    vec![],
                    vm.last_popped()
                        .map(|value| value.to_string().lines().map(String::from).collect())
                        .unwrap_or_default(),
                ),
            }
        }
    };

    check_datatest(path, &test, errors, output)
}

fn disassembly_test(path: &Utf8Path, contents: String) -> datatest_stable::Result<()> {
    let test = read_datatest(&contents);

    let (errors, output): (Vec<String>, Vec<String>) = match compile_source(&test.source) {
        Err(errors) => (errors, vec![]),
        Ok(compiler) => (
            vec![],
            compiler
                .bytecode()
                .to_string()
                .lines()
                .map(String::from)
                .collect(),
        ),
    };

    check_datatest(path, &test, errors, output)
}

datatest_stable::harness! {
    vm_test, "test_data", r"^.*\.mky$",
    disassembly_test, "test_data", r"^.*\.dis$",
}
