//! End-to-end properties: compile → (render →) walk → observe.

use atomscript_core::compiler::{compile, CompileOptions};
use atomscript_core::context::{CollectingCommandSink, MemoryStore, TableModel};
use atomscript_core::error::CompileErrorKind;
use atomscript_core::program::Link;
use atomscript_core::token::TokenKind;
use atomscript_core::value::Var;
use atomscript_core::walker::Walker;
use atomscript_core::CompiledProgram;

fn compile_ok(src: &str) -> CompiledProgram {
    compile(src, &CompileOptions::default()).unwrap_or_else(|e| panic!("compile `{src}`: {e}"))
}

struct Run {
    store: MemoryStore,
    sink: CollectingCommandSink,
}

fn run_program(program: &CompiledProgram, model: &mut TableModel) -> Run {
    let mut store = MemoryStore::new();
    let mut sink = CollectingCommandSink::default();
    Walker::new(program, &mut store, model, &mut sink)
        .run()
        .unwrap_or_else(|e| panic!("run: {e}"));
    Run { store, sink }
}

fn run_src(src: &str) -> Run {
    run_program(&compile_ok(src), &mut TableModel::new())
}

fn var_text(r: &Run, name: &str) -> String {
    use atomscript_core::context::VariableStore;
    r.store.get(name).map_or_else(String::new, |v| v.to_string())
}

fn shape(p: &CompiledProgram) -> (Vec<TokenKind>, Vec<Option<Link>>) {
    (
        p.statements
            .iter()
            .filter_map(|s| s.command_kind())
            .collect(),
        p.statements.iter().map(|s| s.link).collect(),
    )
}

// ---------------------------------------------------------------------------
// Round-trip: render(compile(s)) recompiles to an equivalent program
// ---------------------------------------------------------------------------

#[test]
fn round_trip_preserves_kinds_and_linkage() {
    let sources = [
        "x = 1 + 2 * 3\nprint x",
        "if (a > 0) { print 1 } else { print 2 }",
        "for (var i = 1; i <= 3; i = i + 1) {\nx = x + i\n}",
        "while (x < 10) {\nx += 1\nif (x == 5) { break }\n}",
        "switch (n)\ncase 1:\nprint 1\nbreak\ndefault:\nprint 9\nend switch",
        "a = [1, 2, 3]\nh = {\"k\":1}\np = {1 2 3}\nprint a[2] + h.k + p.x",
        "select {2-5 and :A}\nprint {selected}",
        "function f(a, b)\nreturn a + b\nend function\nx = f(1, 2)",
        "try {\nprint 1\n} catch (e) {\nprint e\n}",
        "echo free text here\nload model.pdb",
    ];
    for src in sources {
        let p1 = compile_ok(src);
        let rendered = p1.render();
        let p2 = compile(&rendered, &CompileOptions::default())
            .unwrap_or_else(|e| panic!("rendered source failed for `{src}`:\n{rendered}\n{e}"));
        assert_eq!(shape(&p1), shape(&p2), "shape drift for `{src}`:\n{rendered}");
        assert_eq!(
            p1.units.len(),
            p2.units.len(),
            "unit drift for `{src}`:\n{rendered}"
        );
        // a second render is a fixed point
        assert_eq!(p2.render(), rendered, "render not stable for `{src}`");
    }
}

// ---------------------------------------------------------------------------
// Flow-linkage soundness
// ---------------------------------------------------------------------------

#[test]
fn if_chains_resolve_to_closed_cycles() {
    let p = compile_ok("if (1)\nprint 1\nelseif (2)\nprint 2\nelse\nprint 3\nend if");
    // follow the chain from the opener: every branch reaches the end
    let end = p.statements.len() - 1;
    let mut at = 0usize;
    let mut hops = 0;
    loop {
        match p.statements[at].link {
            Some(Link::If { next, end: e }) => {
                assert_eq!(e, end);
                at = next;
            }
            Some(Link::Else { end: e }) => {
                assert_eq!(e, end);
                at = e;
            }
            Some(Link::BlockEnd { head }) => {
                assert_eq!(head, 0);
                break;
            }
            other => panic!("chain broken at {at}: {other:?}"),
        }
        hops += 1;
        assert!(hops < 10, "chain does not terminate");
    }
}

#[test]
fn loops_form_a_two_cycle() {
    for src in [
        "while (1) { print 1 }",
        "for (var i = 1; i <= 2; i = i + 1) { print i }",
    ] {
        let p = compile_ok(src);
        let Some(Link::LoopHead { end }) = p.statements[0].link else {
            panic!("no loop head in `{src}`");
        };
        let Some(Link::LoopEnd { head }) = p.statements[end].link else {
            panic!("no loop end in `{src}`");
        };
        assert_eq!(head, 0, "loop tail must point back at the head");
    }
}

// ---------------------------------------------------------------------------
// Flow end to end: the for loop sums to 6 with one end-for linkage
// ---------------------------------------------------------------------------

#[test]
fn for_loop_executes_to_six() {
    let p = compile_ok("x = 0\nfor (var i = 1; i <= 3; i = i + 1) { x = x + i }");
    let back_edges = p
        .statements
        .iter()
        .filter(|s| matches!(s.link, Some(Link::LoopEnd { .. })))
        .count();
    assert_eq!(back_edges, 1, "exactly one end-for linkage");
    let r = run_program(&p, &mut TableModel::new());
    assert_eq!(var_text(&r, "x"), "6");
}

#[test]
fn nested_flow_executes() {
    let r = run_src(
        "total = 0\n\
         for (var i = 1; i <= 4; i = i + 1) {\n\
         if (i %% 2 == 0) { continue }\n\
         for (var j = 1; j <= i; j = j + 1) {\n\
         total = total + 1\n\
         }\n\
         }",
    );
    // i = 1 contributes 1, i = 3 contributes 3
    assert_eq!(var_text(&r, "total"), "4");
}

// ---------------------------------------------------------------------------
// Error end to end: missing end references the if line
// ---------------------------------------------------------------------------

#[test]
fn missing_end_reports_the_if_line() {
    let err = compile("if (x > 0) { print 1", &CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::MissingEnd);
    assert_eq!(err.line, 1);
    assert!(err.message.contains("if"), "message: {}", err.message);
    assert!(!err.partial.statements.is_empty(), "partial program expected");
}

#[test]
fn check_only_compiles_surface_errors() {
    let opts = CompileOptions {
        check_only: true,
        ..CompileOptions::default()
    };
    assert!(compile("print (1", &opts).is_err());
    assert!(compile("print 1", &opts).is_ok());
}

// ---------------------------------------------------------------------------
// Whole-language smoke: selections, functions, containers together
// ---------------------------------------------------------------------------

fn demo_model() -> TableModel {
    let mut m = TableModel::new();
    for (resno, resname, chain, atomname, occ, model) in [
        (1, "ALA", "A", "N", 1.0, 1),
        (1, "ALA", "A", "CA", 1.0, 1),
        (2, "GLY", "A", "CA", 0.5, 1),
        (2, "GLY", "A", "C", 0.8, 1),
        (3, "HOH", "B", "O", 0.9, 2),
    ] {
        m.add_entity(&[
            ("resno", Var::int(resno)),
            ("resname", Var::str(resname)),
            ("chain", Var::str(chain)),
            ("atomname", Var::str(atomname)),
            ("occupancy", Var::float(occ)),
            ("model", Var::int(model)),
        ]);
    }
    m.define_set("water", [4].into_iter().collect());
    m
}

#[test]
fn selection_pipeline_end_to_end() {
    let mut model = demo_model();
    let p = compile_ok(
        "select {gly.CA or water}\n\
         print {selected}\n\
         names = {selected}.atomname\n\
         occs = {:A}.occupancy\n\
         print occs.min",
    );
    let r = run_program(&p, &mut model);
    assert_eq!(r.sink.output[0], "({2 4})");
    assert_eq!(var_text(&r, "names"), "[\"CA\", \"O\"]");
    assert_eq!(r.sink.output[1], "0.5");
}

#[test]
fn model_specifier_selects_by_model() {
    let mut model = demo_model();
    let p = compile_ok("print {*/2}");
    let r = run_program(&p, &mut model);
    assert_eq!(r.sink.output[0], "({4})");
}

#[test]
fn functions_compose_with_selections() {
    let mut model = demo_model();
    let p = compile_ok(
        "function occupancy_below(cut)\n\
         return {occupancy < cut}\n\
         end function\n\
         print occupancy_below(0.85)",
    );
    let r = run_program(&p, &mut model);
    assert_eq!(r.sink.output[0], "({2:3})");
}

#[test]
fn switch_with_strings() {
    let r = run_src(
        "kind = \"two\"\n\
         switch (kind)\n\
         case \"one\":\n\
         n = 1\n\
         break\n\
         case \"two\":\n\
         n = 2\n\
         break\n\
         default:\n\
         n = 0\n\
         end switch",
    );
    assert_eq!(var_text(&r, "n"), "2");
}

#[test]
fn try_catch_inside_loop() {
    let r = run_src(
        "caught = 0\n\
         for (var i = 1; i <= 3; i = i + 1) {\n\
         try {\n\
         x = {\"k\":1} cross 3\n\
         } catch (e) {\n\
         caught = caught + 1\n\
         }\n\
         }",
    );
    assert_eq!(var_text(&r, "caught"), "3");
}

#[test]
fn ternary_and_short_circuit_in_statements() {
    let r = run_src(
        "x = (false ? boom() : 41) + 1\n\
         y = true or boom()\n\
         z = (x == 42) and (y)",
    );
    assert_eq!(var_text(&r, "x"), "42");
    assert_eq!(var_text(&r, "z"), "true");
}

#[test]
fn embedded_script_document_compiles_and_runs() {
    let doc = "HEADER junk that is not script\n\
               **** Begin Script ****\n\
               x = 6 * 7\n\
               **** End Script ****\n\
               TRAILER more junk";
    let r = run_src(doc);
    assert_eq!(var_text(&r, "x"), "42");
}

#[test]
fn implied_string_commands_reach_the_sink() {
    let r = run_src("load model.pdb\ncolor red\necho done");
    assert_eq!(r.sink.commands[0].1, vec!["model.pdb".to_owned()]);
    assert_eq!(r.sink.commands[1].1, vec!["red".to_owned()]);
    assert_eq!(r.sink.output, vec!["done".to_owned()]);
}
