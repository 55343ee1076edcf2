//! `math`.

use std::rc::Rc;

use crate::interp::exception::{EvalResult, ExcKind, Unwind};
use crate::interp::object::{Args, ModuleObj, NativeFunction};
use crate::interp::value::Value;
use crate::interp::Interpreter;

pub(super) fn module() -> ModuleObj {
    let module = ModuleObj::new("math", "Mathematical functions for floats and integers.");
    module.set("pi", Value::Float(std::f64::consts::PI));
    module.set("e", Value::Float(std::f64::consts::E));
    module.set("tau", Value::Float(std::f64::consts::TAU));
    module.set("inf", Value::Float(f64::INFINITY));
    module.set("nan", Value::Float(f64::NAN));
    module.add_natives(FUNCTIONS);
    module
}

fn number(value: &Value) -> EvalResult<f64> {
    value.as_float().ok_or_else(|| {
        Unwind::type_error(format!(
            "must be real number, not {}",
            value.type_name()
        ))
    })
}

fn integer(value: &Value, func: &str) -> EvalResult<i64> {
    value.as_int().ok_or_else(|| {
        Unwind::type_error(format!(
            "{func}() argument must be an integer, not '{}'",
            value.type_name()
        ))
    })
}

fn domain_error() -> Unwind {
    Unwind::value_error("math domain error")
}

/// Apply a one-argument float function.
fn unary(args: &Args, name: &str, f: fn(f64) -> f64) -> EvalResult {
    args.no_keywords(name)?;
    args.arity(name, 1, 1)?;
    Ok(Value::Float(f(number(&args.positional[0])?)))
}

/// Like [`unary`] but rejects arguments outside the function's domain.
fn checked(args: &Args, name: &str, ok: fn(f64) -> bool, f: fn(f64) -> f64) -> EvalResult {
    args.no_keywords(name)?;
    args.arity(name, 1, 1)?;
    let x = number(&args.positional[0])?;
    if !ok(x) {
        return Err(domain_error());
    }
    Ok(Value::Float(f(x)))
}

fn float_to_int(x: f64) -> EvalResult {
    if x.is_nan() {
        return Err(Unwind::value_error("cannot convert float NaN to integer"));
    }
    if x.is_infinite() || x >= i64::MAX as f64 || x < i64::MIN as f64 {
        return Err(Unwind::new(ExcKind::OverflowError, "cannot convert float infinity to integer"));
    }
    Ok(Value::Int(x as i64))
}

fn rounding(args: &Args, name: &str, f: fn(f64) -> f64) -> EvalResult {
    args.no_keywords(name)?;
    args.arity(name, 1, 1)?;
    match &args.positional[0] {
        Value::Float(x) => float_to_int(f(*x)),
        other => Ok(Value::Int(integer(other, name)?)),
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

fn log(_: &Rc<Interpreter>, args: Args) -> EvalResult {
    args.no_keywords("log")?;
    args.arity("log", 1, 2)?;
    let x = number(&args.positional[0])?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    match args.get(1) {
        None => Ok(Value::Float(x.ln())),
        Some(base) => {
            let base = number(base)?;
            if base <= 0.0 || base == 1.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
    }
}

fn isclose(_: &Rc<Interpreter>, mut args: Args) -> EvalResult {
    let rel_tol = args.take_keyword("rel_tol").map(|v| number(&v)).transpose()?.unwrap_or(1e-9);
    let abs_tol = args.take_keyword("abs_tol").map(|v| number(&v)).transpose()?.unwrap_or(0.0);
    args.no_keywords("isclose")?;
    args.arity("isclose", 2, 2)?;
    let a = number(&args.positional[0])?;
    let b = number(&args.positional[1])?;
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (a - b).abs();
    Ok(Value::Bool(
        diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()) || diff <= abs_tol,
    ))
}

fn factorial(_: &Rc<Interpreter>, args: Args) -> EvalResult {
    args.no_keywords("factorial")?;
    args.arity("factorial", 1, 1)?;
    let n = integer(&args.positional[0], "factorial")?;
    if n < 0 {
        return Err(Unwind::value_error("factorial() not defined for negative values"));
    }
    (1..=n)
        .try_fold(1i64, |acc, k| acc.checked_mul(k))
        .map(Value::Int)
        .ok_or_else(|| Unwind::new(ExcKind::OverflowError, "integer result too large"))
}

static FUNCTIONS: &[NativeFunction] = &[
    NativeFunction::sync("sqrt", "(x, /)", "Return the square root of x.", |_, args| {
        checked(&args, "sqrt", |x| x >= 0.0, f64::sqrt)
    }),
    NativeFunction::sync("exp", "(x, /)", "Return e raised to the power of x.", |_, args| unary(&args, "exp", f64::exp)),
    NativeFunction::sync("log", "(x, [base=math.e])", "Return the logarithm of x to the given base.", log),
    NativeFunction::sync("log2", "(x, /)", "Return the base 2 logarithm of x.", |_, args| {
        checked(&args, "log2", |x| x > 0.0, f64::log2)
    }),
    NativeFunction::sync("log10", "(x, /)", "Return the base 10 logarithm of x.", |_, args| {
        checked(&args, "log10", |x| x > 0.0, f64::log10)
    }),
    NativeFunction::sync("sin", "(x, /)", "Return the sine of x (measured in radians).", |_, args| unary(&args, "sin", f64::sin)),
    NativeFunction::sync("cos", "(x, /)", "Return the cosine of x (measured in radians).", |_, args| unary(&args, "cos", f64::cos)),
    NativeFunction::sync("tan", "(x, /)", "Return the tangent of x (measured in radians).", |_, args| unary(&args, "tan", f64::tan)),
    NativeFunction::sync("asin", "(x, /)", "Return the arc sine (measured in radians) of x.", |_, args| {
        checked(&args, "asin", |x| (-1.0..=1.0).contains(&x), f64::asin)
    }),
    NativeFunction::sync("acos", "(x, /)", "Return the arc cosine (measured in radians) of x.", |_, args| {
        checked(&args, "acos", |x| (-1.0..=1.0).contains(&x), f64::acos)
    }),
    NativeFunction::sync("atan", "(x, /)", "Return the arc tangent (measured in radians) of x.", |_, args| unary(&args, "atan", f64::atan)),
    NativeFunction::sync("atan2", "(y, x, /)", "Return the arc tangent (measured in radians) of y/x.", |_, args| {
        args.arity("atan2", 2, 2)?;
        Ok(Value::Float(number(&args.positional[0])?.atan2(number(&args.positional[1])?)))
    }),
    NativeFunction::sync("hypot", "(*coordinates)", "Multidimensional Euclidean distance from the origin to a point.", |_, args| {
        args.no_keywords("hypot")?;
        let mut sum = 0.0;
        for value in &args.positional {
            let x = number(value)?;
            sum += x * x;
        }
        Ok(Value::Float(sum.sqrt()))
    }),
    NativeFunction::sync("degrees", "(x, /)", "Convert angle x from radians to degrees.", |_, args| unary(&args, "degrees", f64::to_degrees)),
    NativeFunction::sync("radians", "(x, /)", "Convert angle x from degrees to radians.", |_, args| unary(&args, "radians", f64::to_radians)),
    NativeFunction::sync("fabs", "(x, /)", "Return the absolute value of the float x.", |_, args| unary(&args, "fabs", f64::abs)),
    NativeFunction::sync("pow", "(x, y, /)", "Return x**y (x to the power of y).", |_, args| {
        args.arity("pow", 2, 2)?;
        Ok(Value::Float(number(&args.positional[0])?.powf(number(&args.positional[1])?)))
    }),
    NativeFunction::sync("floor", "(x, /)", "Return the floor of x as an Integral.", |_, args| rounding(&args, "floor", f64::floor)),
    NativeFunction::sync("ceil", "(x, /)", "Return the ceiling of x as an Integral.", |_, args| rounding(&args, "ceil", f64::ceil)),
    NativeFunction::sync("trunc", "(x, /)", "Truncates the Real x to the nearest Integral toward 0.", |_, args| rounding(&args, "trunc", f64::trunc)),
    NativeFunction::sync("isnan", "(x, /)", "Return True if x is a NaN (not a number), and False otherwise.", |_, args| {
        args.arity("isnan", 1, 1)?;
        Ok(Value::Bool(number(&args.positional[0])?.is_nan()))
    }),
    NativeFunction::sync("isinf", "(x, /)", "Return True if x is a positive or negative infinity, and False otherwise.", |_, args| {
        args.arity("isinf", 1, 1)?;
        Ok(Value::Bool(number(&args.positional[0])?.is_infinite()))
    }),
    NativeFunction::sync("isfinite", "(x, /)", "Return True if x is neither an infinity nor a NaN, and False otherwise.", |_, args| {
        args.arity("isfinite", 1, 1)?;
        Ok(Value::Bool(number(&args.positional[0])?.is_finite()))
    }),
    NativeFunction::sync("isclose", "(a, b, *, rel_tol=1e-09, abs_tol=0.0)", "Determine whether two floating-point numbers are close in value.", isclose),
    NativeFunction::sync("factorial", "(n, /)", "Find n!.", factorial),
    NativeFunction::sync("gcd", "(*integers)", "Greatest Common Divisor.", |_, args| {
        args.no_keywords("gcd")?;
        let mut acc = 0;
        for value in &args.positional {
            acc = gcd(acc, integer(value, "gcd")?);
        }
        Ok(Value::Int(acc))
    }),
];

#[cfg(test)]
mod tests {
    use crate::interp::testing::eval_repr;

    #[tokio::test]
    async fn test_math_functions() {
        assert_eq!(eval_repr("import math\n(math.sqrt(16), math.floor(2.7), math.ceil(2.1), math.gcd(12, 18))").await, "(4.0, 2, 3, 6)");
        assert_eq!(eval_repr("import math\n(math.factorial(5), math.isclose(0.1 + 0.2, 0.3), math.log(8, 2))").await, "(120, True, 3.0)");
        assert_eq!(eval_repr("import math\nround(math.pi, 4)").await, "3.1416");
    }

    #[tokio::test]
    async fn test_math_domain_errors() {
        assert_eq!(eval_repr("import math\nmath.sqrt(-1)").await, "!ValueError");
        assert_eq!(eval_repr("import math\nmath.log(0)").await, "!ValueError");
        assert_eq!(eval_repr("import math\nmath.sqrt('x')").await, "!TypeError");
    }
}
