//! End-to-end tests: compile whole translation units and check the
//! emitted assembly structurally. No VM is available in-tree, so the
//! assertions target labels, opcodes and data rather than execution.

use clap::Parser;
use vmcc::driver::cli::Cli;

fn cli() -> Cli {
    Cli::parse_from(["vmcc", "test.i"])
}

fn compile(source: &str) -> String {
    vmcc::compile(source.as_bytes().to_vec(), "test.i", &cli())
        .unwrap_or_else(|e| panic!("compilation failed: {}", e))
}

fn compile_err(source: &str) -> String {
    match vmcc::compile(source.as_bytes().to_vec(), "test.i", &cli()) {
        Ok(_) => panic!("expected a diagnostic"),
        Err(e) => e.to_string(),
    }
}

#[test]
fn trivial_main() {
    let asm = compile("int main(void){ return 0; }");
    assert!(asm.contains("=main"));
    assert!(asm.contains("enter"));
    assert!(asm.contains("zero r0"));
    assert!(asm.contains("leave"));
    assert!(asm.contains("ret"));
}

#[test]
fn struct_by_value_return() {
    let asm = compile(
        "struct P { int x, y; } f(void){ struct P a = {2,3}; return a; }\n\
         int main(void){ struct P a = f(); if (a.x!=2) return 1; if (a.y!=3) return 2; return 0; }",
    );
    assert!(asm.contains("=f"));
    assert!(asm.contains("=main"));
    // The wide-result call passes the hidden pointer in r1.
    assert!(asm.contains("call ^f"));
}

#[test]
fn global_array_and_pointer_arithmetic() {
    let asm = compile(
        "int a[4]={10,20,30,40};\n\
         int main(void){ int* p=a; return *(p+2)-30; }",
    );
    // The array data: 10, 20, 30, 40 as little-endian words.
    assert!(asm.contains("=a"));
    assert!(asm.contains("'0A'00'00'00"));
    assert!(asm.contains("'1E'00'00'00"));
    // The pointer offset is scaled by a shift of 2 (sizeof int == 4).
    assert!(asm.contains("shl"));
}

#[test]
fn signed_right_shift() {
    let asm = compile("int main(void){ int x=-8; return (x>>2)==-2 ? 0 : 1; }");
    assert!(asm.contains("shrs"));
}

#[test]
fn unsigned_comparison_wins_at_equal_rank() {
    let asm = compile("int main(void){ return (-1 > 0u) ? 0 : 1; }");
    // -1 converts to unsigned, so the comparison must be cmpu.
    assert!(asm.contains("cmpu"));
    assert!(!asm.contains("cmps "));
}

#[test]
fn enum_constants_auto_increment() {
    let asm = compile(
        "enum E { A, B=5, C };\n\
         int main(void){ return (A==0 && B==5 && C==6) ? 0 : 1; }",
    );
    assert!(asm.contains("=main"));
}

#[test]
fn string_literals_get_labels() {
    let asm = compile(
        "int puts(char *s);\n\
         int main(void){ puts(\"hello\"); return 0; }",
    );
    assert!(asm.contains("@__S_0"));
    assert!(asm.contains("\"hello\""));
    assert!(asm.contains("'00"));
    assert!(asm.contains("call ^puts"));
}

#[test]
fn static_local_is_renamed_and_emitted() {
    let asm = compile("int counter(void){ static int n = 7; return n; }");
    assert!(asm.contains("@__L_0_n"));
    assert!(asm.contains("'07'00'00'00"));
}

#[test]
fn tentative_definition_zero_filled() {
    let asm = compile("int pending; int main(void){ return pending; }");
    assert!(asm.contains("=pending"));
    assert!(asm.contains("'00'00'00'00"));
}

#[test]
fn while_loop_and_compound_assign() {
    let asm = compile(
        "int main(void){ int i=0; int s=0; while (i < 10) { s += i; i++; } return s; }",
    );
    assert!(asm.contains("jz"));
    assert!(asm.contains("jmp"));
    assert!(asm.contains(":__J_"));
    assert!(asm.contains("&__J_"));
}

#[test]
fn switch_compiles_to_compare_chain() {
    let asm = compile(
        "int classify(int x){ switch (x) { case 1: return 10; case 2: return 20; default: return 0; } }",
    );
    let compares = asm.matches("cmps").count();
    assert!(compares >= 2, "expected a compare per case:\n{}", asm);
}

#[test]
fn goto_uses_named_labels() {
    let asm = compile(
        "int main(void){ int i=0; again: i++; if (i < 3) goto again; return 0; }",
    );
    assert!(asm.contains(":__U_again"));
    assert!(asm.contains("&__U_again"));
}

#[test]
fn statement_expression_produces_value() {
    let asm = compile("int main(void){ int x = ({ int y = 2; y + 1; }); return x - 3; }");
    assert!(asm.contains("=main"));
}

#[test]
fn variadic_function_and_va_builtins() {
    let asm = compile(
        "int sum(int n, ...){\n\
             __builtin_va_list ap;\n\
             int total = 0;\n\
             __builtin_va_start(ap, n);\n\
             while (n-- > 0) total += __builtin_va_arg(ap, int);\n\
             __builtin_va_end(ap);\n\
             return total;\n\
         }\n\
         int main(void){ return sum(3, 1, 2, 3) - 6; }",
    );
    assert!(asm.contains("=sum"));
    // Variadic arguments are pushed through a reserved stack block.
    assert!(asm.contains("sub rsp rsp"));
}

#[test]
fn func_builtin_emits_name_once() {
    let asm = compile(
        "char *name(void){ char *a = __func__; char *b = __func__; return a; }",
    );
    assert!(asm.contains("\"name\""));
    assert_eq!(asm.matches("\"name\"").count(), 1);
}

#[test]
fn long_long_arithmetic_calls_helpers() {
    let asm = compile(
        "long long f(long long a, long long b){ return a + b; }",
    );
    assert!(asm.contains("call ^__llong_add"));
}

#[test]
fn double_arithmetic_calls_helpers() {
    let asm = compile("double f(double a, double b){ return a * b; }");
    assert!(asm.contains("call ^__double_mul"));
}

#[test]
fn float_arithmetic_is_by_value() {
    let asm = compile("float f(float a, float b){ return a / b; }");
    assert!(asm.contains("call ^__float_div"));
}

#[test]
fn anonymous_member_access() {
    let asm = compile(
        "struct S { int head; struct { int a; int b; }; };\n\
         int f(struct S *s){ return s->b; }",
    );
    // b sits at offset 8: base + 8 then a word load.
    assert!(asm.contains("add r0 r0 8"));
    assert!(asm.contains("ldw"));
}

#[test]
fn function_pointer_call() {
    let asm = compile(
        "int add(int a, int b){ return a + b; }\n\
         int main(void){ int (*op)(int, int) = add; return op(1, 2) - 3; }",
    );
    assert!(asm.contains("call r4"));
}

#[test]
fn char_array_string_initializer() {
    let asm = compile("char greeting[8] = \"hi\"; int main(void){ return greeting[0]; }");
    assert!(asm.contains("=greeting"));
    // 'h' 'i' then zero padding.
    assert!(asm.contains("'68'69"));
}

#[test]
fn debug_line_directives_under_g() {
    let source = "int main(void){\nint x = 1;\nreturn x;\n}";
    let cli = Cli::parse_from(["vmcc", "-g", "test.i"]);
    let asm = vmcc::compile(source.as_bytes().to_vec(), "test.i", &cli).unwrap();
    assert!(asm.starts_with("#line manual\n"));
    assert!(asm.contains("#line 1 \"test.i\""));
}

#[test]
fn prototype_scope_tags_survive_into_body() {
    // struct Q is declared among the parameters; the body re-enters that
    // scope and can still see it.
    let asm = compile("int f(struct Q { int v; } *q){ return q->v; }");
    assert!(asm.contains("=f"));
    assert!(asm.contains("ldw"));
}

#[test]
fn block_scope_extern_adopts_file_scope() {
    let asm = compile("int g = 3; int main(void){ extern int g; return g; }");
    assert!(asm.contains("=g"));
    assert!(asm.contains("^g"));
}

#[test]
fn do_while_tests_condition_at_the_bottom() {
    let asm = compile("int main(void){ int i = 0; do { i++; } while (i < 3); return 0; }");
    assert!(asm.contains("jnz"));
}

// === Diagnostics ===

#[test]
fn conflicting_function_redeclaration() {
    let message = compile_err("int f(int); int f(long);");
    assert!(message.contains("different type"), "{}", message);
}

#[test]
fn duplicate_struct_definition() {
    let message = compile_err("struct S { int x; }; struct S { int y; };");
    assert!(message.contains("duplicate"), "{}", message);
}

#[test]
fn float_initializer_for_global_int() {
    let message = compile_err("int x = 1.5;");
    assert!(message.contains("constant"), "{}", message);
}

#[test]
fn long_long_long_rejected() {
    let message = compile_err("long long long x;");
    assert!(message.contains("long long long"), "{}", message);
}

#[test]
fn duplicate_case_rejected() {
    let message = compile_err(
        "int f(int x){ switch (x) { case 1: return 1; case 1: return 2; } return 0; }",
    );
    assert!(message.contains("duplicate case"), "{}", message);
}

#[test]
fn missing_semicolon_is_fatal() {
    compile_err("int main(void){ return 0 }");
}

#[test]
fn undeclared_identifier_is_fatal() {
    let message = compile_err("int main(void){ return nope; }");
    assert!(message.contains("nope"), "{}", message);
}

#[test]
fn flexible_array_must_be_last() {
    let message = compile_err("struct S { int data[]; int after; };");
    assert!(message.contains("last member"), "{}", message);
}

#[test]
fn atomic_is_unsupported() {
    let message = compile_err("_Atomic int x;");
    assert!(message.contains("_Atomic"), "{}", message);
}

#[test]
fn goto_to_undefined_label() {
    let message = compile_err("int main(void){ goto nowhere; return 0; }");
    assert!(message.contains("nowhere"), "{}", message);
}
