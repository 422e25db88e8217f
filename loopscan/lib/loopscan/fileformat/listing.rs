use crate::error::{Error, ListingError, Result};
use crate::ir::{Access, Function, Instruction, Opcode, Operand, ShiftKind, VarKind, Variable};
use crate::support::diagnostic::{DiagnosticContext, Remark};
use json::JsonValue;
use std::fs;

/**
 * Reads the decoded listing of a module.
 *
 * A listing that is not valid JSON, or has no `functions` array, is an error. A function
 * with a malformed field is reported and skipped; the others are still returned.
 **/
pub fn load_listing(file: &str, diag: &DiagnosticContext) -> Result<Vec<Function>> {
    let data = fs::read_to_string(file)?;
    parse_listing(data.as_str(), diag)
}

pub fn parse_listing(data: &str, diag: &DiagnosticContext) -> Result<Vec<Function>> {
    let d = json::parse(data).map_err(|json_err| {
        diag.record(Remark::listing(
            ListingError::InvalidJson.into(),
            Some(json_err.to_string()),
        ));
        Error::ListingError(ListingError::InvalidJson)
    })?;
    let funcs = match &d["functions"] {
        JsonValue::Array(funcs) => funcs,
        _ => return Err(ListingError::MissingField("functions").into()),
    };
    let mut ret = vec![];
    for (i, f) in funcs.iter().enumerate() {
        match parse_function(ret.len(), f) {
            Ok(func) => ret.push(func),
            Err(e) => {
                let name = f["name"].as_str().map_or_else(|| format!("#{}", i), str::to_string);
                diag.record(Remark::listing(e.into(), Some(format!("in function {}", name))));
            }
        }
    }
    log::debug!("listing: {} functions, {} skipped", ret.len(), funcs.len() - ret.len());
    Ok(ret)
}

fn parse_function(id: usize, v: &JsonValue) -> std::result::Result<Function, ListingError> {
    let name = v["name"].as_str().ok_or(ListingError::MissingField("name"))?;
    let entry = v["entry"].as_u64().ok_or(ListingError::MissingField("entry"))?;
    let instrs = match &v["instructions"] {
        JsonValue::Array(x) => x,
        _ => return Err(ListingError::MissingField("instructions")),
    };
    let instructions = instrs
        .iter()
        .enumerate()
        .map(|(i, x)| parse_instruction(i, x))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Function::new(id, name, entry, instructions))
}

fn parse_instruction(id: usize, v: &JsonValue) -> std::result::Result<Instruction, ListingError> {
    let pc = v["pc"].as_u64().ok_or(ListingError::MissingField("pc"))?;
    let opcode = v["opcode"]
        .as_str()
        .ok_or(ListingError::MissingField("opcode"))?
        .parse::<Opcode>()?;
    let operands = match &v["operands"] {
        JsonValue::Array(ops) => ops
            .iter()
            .map(parse_operand)
            .collect::<std::result::Result<Vec<_>, _>>()?,
        JsonValue::Null => vec![],
        _ => return Err(ListingError::MissingField("operands")),
    };
    let instr = Instruction::new(id, pc, opcode, operands.as_slice());
    Ok(match v["target"].as_u64() {
        Some(t) => instr.with_target(t),
        None => instr,
    })
}

fn register(v: &JsonValue, field: &'static str) -> std::result::Result<Option<u32>, ListingError> {
    match &v[field] {
        JsonValue::Null => Ok(None),
        x => x.as_u32().map(Some).ok_or(ListingError::MissingField(field)),
    }
}

fn shift(v: &JsonValue) -> std::result::Result<(ShiftKind, u8), ListingError> {
    let kind = match v["shift"].as_str() {
        Some("lsl") => ShiftKind::Lsl,
        Some("lsr") => ShiftKind::Lsr,
        Some("asr") => ShiftKind::Asr,
        Some(x) => return Err(ListingError::InvalidOperand(x.to_string())),
        None => return Err(ListingError::MissingField("shift")),
    };
    let amount = v["amount"].as_u8().ok_or(ListingError::MissingField("amount"))?;
    Ok((kind, amount))
}

fn parse_operand(v: &JsonValue) -> std::result::Result<Operand, ListingError> {
    let access = v["access"]
        .as_str()
        .ok_or(ListingError::MissingField("access"))?
        .parse::<Access>()?;
    let kind_name = v["kind"].as_str().ok_or(ListingError::MissingField("kind"))?;
    let int = |field: &'static str| v[field].as_i64().ok_or(ListingError::MissingField(field));
    let kind = match kind_name {
        "reg" => VarKind::Register(v["reg"].as_u32().ok_or(ListingError::MissingField("reg"))?),
        "stack" => VarKind::StackSlot(int("offset")?),
        "frame" => VarKind::StackFrameSlot(int("offset")?),
        "mem" | "poly" => {
            let base = register(v, "base")?;
            let index = register(v, "index")?;
            let scale = v["scale"].as_u8().unwrap_or(1);
            let disp = v["disp"].as_i64().unwrap_or(0);
            if kind_name == "mem" {
                VarKind::Memory {
                    base,
                    index,
                    scale,
                    disp,
                }
            } else {
                VarKind::Polynomial {
                    base,
                    index,
                    scale,
                    disp,
                }
            }
        }
        "abs" => VarKind::Absolute(v["addr"].as_u64().ok_or(ListingError::MissingField("addr"))?),
        "imm" => VarKind::Constant(int("value")?),
        "flag" => VarKind::ControlFlag(v["flag"].as_u32().unwrap_or(0)),
        "shreg" => {
            let (shift, amount) = shift(v)?;
            VarKind::ShiftedRegister {
                reg: v["reg"].as_u32().ok_or(ListingError::MissingField("reg"))?,
                shift,
                amount,
            }
        }
        "shimm" => {
            let (shift, amount) = shift(v)?;
            VarKind::ShiftedConstant {
                value: int("value")?,
                shift,
                amount,
            }
        }
        "unknown" => VarKind::Unknown,
        x => return Err(ListingError::InvalidOperand(x.to_string())),
    };
    let size = v["size"].as_u8().unwrap_or(8);
    Ok(Operand {
        var: Variable::new(kind, size),
        access,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{
        "functions": [
            {
                "name": "sum",
                "entry": 4096,
                "instructions": [
                    {"pc": 4096, "opcode": "mov", "operands": [
                        {"access": "w", "kind": "reg", "reg": 0},
                        {"access": "r", "kind": "imm", "value": 0}]},
                    {"pc": 4100, "opcode": "load", "operands": [
                        {"access": "w", "kind": "reg", "reg": 1},
                        {"access": "r", "kind": "mem", "base": 2, "index": 0, "scale": 4}]},
                    {"pc": 4104, "opcode": "add", "operands": [
                        {"access": "rw", "kind": "reg", "reg": 0},
                        {"access": "r", "kind": "imm", "value": 1}]},
                    {"pc": 4108, "opcode": "cmp", "operands": [
                        {"access": "w", "kind": "flag"},
                        {"access": "r", "kind": "reg", "reg": 0},
                        {"access": "r", "kind": "imm", "value": 100}]},
                    {"pc": 4112, "opcode": "jcc", "target": 4100, "operands": [
                        {"access": "r", "kind": "flag"}]},
                    {"pc": 4116, "opcode": "ret"}
                ]
            },
            {
                "name": "broken",
                "entry": 8192,
                "instructions": [{"pc": 8192, "opcode": "frobnicate"}]
            }
        ]
    }"#;

    #[test]
    fn test_parse_listing() {
        let diag = DiagnosticContext::default();
        let funcs = parse_listing(LISTING, &diag).expect("listing");
        assert_eq!(1, funcs.len());
        let f = &funcs[0];
        assert_eq!("sum", f.name);
        assert_eq!(0x1000, f.entry);
        assert_eq!(6, f.instructions.len());
        assert_eq!(Some(0x1004), f.instructions[4].target);
        assert_eq!(Opcode::ConditionalBranch, f.instructions[4].opcode);
        assert_eq!(
            Variable::memory(Some(2), Some(0), 4, 0),
            f.instructions[1].operands[1].var
        );
        assert_eq!(Access::READ | Access::WRITE, f.instructions[2].operands[0].access);

        let remarks = diag.remarks();
        assert_eq!(1, remarks.len());
        assert!(matches!(
            remarks[0].error(),
            Error::ListingError(ListingError::InvalidOpcode(op)) if op == "frobnicate"
        ));
    }

    #[test]
    fn test_operand_kinds() {
        let v = json::parse(r#"{"access": "r", "kind": "shreg", "reg": 3, "shift": "lsl", "amount": 2}"#)
            .expect("json");
        let op = parse_operand(&v).expect("operand");
        assert!(matches!(
            op.var.kind,
            VarKind::ShiftedRegister {
                reg: 3,
                shift: ShiftKind::Lsl,
                amount: 2
            }
        ));
        let v = json::parse(r#"{"access": "w", "kind": "stack", "offset": -16, "size": 4}"#).expect("json");
        assert_eq!(Variable::stack(-16, 4), parse_operand(&v).expect("operand").var);
        let v = json::parse(r#"{"access": "x", "kind": "reg", "reg": 1}"#).expect("json");
        assert!(matches!(parse_operand(&v), Err(ListingError::InvalidAccess(_))));
        let v = json::parse(r#"{"access": "r", "kind": "vector"}"#).expect("json");
        assert!(matches!(parse_operand(&v), Err(ListingError::InvalidOperand(_))));
    }

    #[test]
    fn test_invalid_listing() {
        let diag = DiagnosticContext::default();
        assert!(matches!(
            parse_listing("{", &diag),
            Err(Error::ListingError(ListingError::InvalidJson))
        ));
        assert_eq!(1, diag.len());
        assert!(matches!(
            parse_listing("{}", &diag),
            Err(Error::ListingError(ListingError::MissingField("functions")))
        ));
    }
}
