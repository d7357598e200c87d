mod common;

use common::{run, run_with_externs};

#[test]
fn sum_of_two_locals() {
  let run = run("int a = 1; int b = 2; a + b;");
  assert_eq!(run.machine.rax(), 3);
}

#[test]
fn store_through_pointer_updates_target() {
  let run = run("int *p; int x = 5; p = &x; *p = 9;");
  assert_eq!(run.local("x"), 9);
  assert_eq!(run.local("p") as u64, run.local_address("x"));
}

#[test]
fn brace_initialised_array_element() {
  let run = run("int arr[3] = {10, 20, 30}; arr[1];");
  assert_eq!(run.machine.rax(), 20);
}

#[test]
fn if_else_takes_one_branch() {
  let run = run("if (1 < 2) { foo(); } else { bar(); }");
  assert_eq!(run.machine.calls_to("foo").len(), 1);
  assert!(run.machine.calls_to("bar").is_empty());

  let run = common::run("if (2 < 1) { foo(); } else { bar(); }");
  assert!(run.machine.calls_to("foo").is_empty());
  assert_eq!(run.machine.calls_to("bar").len(), 1);
}

#[test]
fn for_loop_passes_counter() {
  let run = run("for (int i = 0; i < 3; i = i + 1) { foo(i); }");
  let seen: Vec<i64> = run
    .machine
    .calls_to("foo")
    .iter()
    .map(|call| call.args[0])
    .collect();
  assert_eq!(seen, vec![0, 1, 2]);
}

#[test]
fn string_literal_plus_offset() {
  let run = run("char *s = \"ab\" + 1; *s;");
  assert_eq!(run.machine.rax(), i64::from(b'b'));
  let s = run.local("s") as u64;
  assert_eq!(s, run.machine.symbol(".L0") + 1);
}

#[test]
fn arithmetic_precedence_and_division() {
  assert_eq!(run("1 + 2 * 3;").machine.rax(), 7);
  assert_eq!(run("(1 + 2) * 3;").machine.rax(), 9);
  assert_eq!(run("20 / 3 - 1;").machine.rax(), 5);
  assert_eq!(run("10 - 4 - 3;").machine.rax(), 3);
}

#[test]
fn comparisons_produce_zero_or_one() {
  assert_eq!(run("3 > 2;").machine.rax(), 1);
  assert_eq!(run("3 < 2;").machine.rax(), 0);
  assert_eq!(run("2 == 2;").machine.rax(), 1);
  assert_eq!(run("!0;").machine.rax(), 1);
  assert_eq!(run("!5;").machine.rax(), 0);
}

#[test]
fn chained_assignment() {
  let run = run("int a; int b; a = b = 7; a + b;");
  assert_eq!(run.machine.rax(), 14);
}

#[test]
fn char_locals_truncate_on_store() {
  let run = run("char c = 'A'; c = c + 256 + 1; c;");
  assert_eq!(run.machine.rax(), 66);
}

#[test]
fn char_array_from_string() {
  let run = run("char s[] = \"hey\"; s[1];");
  assert_eq!(run.machine.rax(), i64::from(b'e'));
  let base = run.local_address("s");
  assert_eq!(run.byte_at(base + 3), 0);
}

#[test]
fn char_array_is_nul_padded() {
  let run = run("char s[6] = \"ab\"; s[4];");
  assert_eq!(run.machine.rax(), 0);
}

#[test]
fn short_brace_list_is_zero_filled() {
  let run = run("int a[4] = {1, 2}; a[0] + a[1] + a[2] + a[3];");
  assert_eq!(run.machine.rax(), 3);
}

#[test]
fn array_elements_are_assignable() {
  let run = run("int a[3]; a[0] = 4; a[2] = 5; a[0] * a[2];");
  assert_eq!(run.machine.rax(), 20);
}

#[test]
fn multi_dimensional_array() {
  let run = run(
    "int g[2][3]; \
     for (int i = 0; i < 2; i = i + 1) \
       for (int j = 0; j < 3; j = j + 1) \
         g[i][j] = i * 10 + j; \
     g[1][2];",
  );
  assert_eq!(run.machine.rax(), 12);
}

#[test]
fn increments_through_pointers() {
  let run = run("int a[3] = {5, 6, 7}; int *p = a; ++p; ++*p; *p;");
  assert_eq!(run.machine.rax(), 7);
  assert_eq!(run.local("p") as u64, run.local_address("a") + 4);
}

#[test]
fn decrement() {
  let run = run("int x = 3; --x; --x;");
  assert_eq!(run.local("x"), 1);
}

#[test]
fn nested_calls_keep_outer_arguments() {
  let run = run("f(1, g(2), 3);");
  let g = run.machine.calls_to("g");
  assert_eq!(g[0].args[0], 2);
  let f = run.machine.calls_to("f");
  assert_eq!(&f[0].args[..3], &[1, 0, 3]);
}

#[test]
fn six_arguments_land_in_registers() {
  let run = run("f(1, 2, 3, 4, 5, 6);");
  assert_eq!(run.machine.calls[0].args, [1, 2, 3, 4, 5, 6]);
}

#[test]
fn string_arguments_pass_addresses() {
  let run = run("puts(\"hi\");");
  let addr = run.machine.calls[0].args[0] as u64;
  assert_eq!(addr, run.machine.symbol(".L0"));
  assert_eq!(run.byte_at(addr), b'h');
}

#[test]
fn extern_global_is_read_and_written() {
  let run = run_with_externs("counter = counter + 5; counter;", &["int counter"]);
  assert_eq!(run.machine.rax(), 5);
  assert_eq!(run.machine.read_mem(run.machine.symbol("counter"), 4), 5);
}

#[test]
fn for_with_empty_clauses_and_inner_if() {
  let run = run(
    "int n = 0; \
     for (; n < 10;) { n = n + 1; if (n == 4) stop(n); }",
  );
  assert_eq!(run.local("n"), 10);
  let stops = run.machine.calls_to("stop");
  assert_eq!(stops.len(), 1);
  assert_eq!(stops[0].args[0], 4);
}

#[test]
fn shadowed_local_gets_its_own_slot() {
  let run = run("int x = 1; int y = x; int x = 2; x + y;");
  assert_eq!(run.machine.rax(), 3);
}

#[test]
fn void_pointer_round_trips_an_address() {
  let run = run("int x = 7; void *v = &x; char *s = v; int *p = v; v = s; *p;");
  assert_eq!(run.machine.rax(), 7);
  let x = run.local_address("x");
  assert_eq!(run.local("v") as u64, x);
  assert_eq!(run.local("s") as u64, x);
  assert!(run.ctx.warnings.is_empty());
}

#[test]
fn library_entry_points_agree_with_the_pipeline() {
  let source = "int x; void *v = &x; char *s = v;";
  assert_eq!(
    qcc::dump_ast(source).unwrap(),
    "(decl int x)\n(decl void* v (& x))\n(decl char* s v)\n"
  );
  assert_eq!(qcc::generate_assembly(source).unwrap(), run(source).asm);
  assert!(qcc::generate_assembly("int *p; 1 - p;").is_err());
}
