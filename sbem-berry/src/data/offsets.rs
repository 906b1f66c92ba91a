use super::{LoadError, TileIdMap};
use crate::{Idx2d, Idx4d};
use ndarray::{Array3, Array4, ArrayD, ArrayView3, ArrayView4, Axis, Ix3, OwnedRepr};
use ndarray_npy::NpzReader;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::path::Path;

/// 单个 section 的 coarse offset 张量.
///
/// 规范形状为 `(2, 2, rows, cols)`:
///
/// 1. 第 0 轴是通道: [`crate::consts::CHANNEL_CX`] 是 (y, x) 处 tile 与其
///   **右侧** 邻居的 shift 向量, [`crate::consts::CHANNEL_CY`] 是与其
///   **下方** 邻居的 shift 向量;
/// 2. 第 1 轴是 shift 向量分量 (0: x, 1: y);
/// 3. 后两轴与该 section 的 tile 网格同形.
///
/// 无邻居或上游计算失败的 tile 对以 ±Inf 表示, 这是退化值定位的输入信号.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseOffsetTensor {
    data: Array4<f64>,
}

/// `cx_cy.json` 的顶层结构. 两个值都是 (可能带多余前导单例轴的) 嵌套数组.
#[derive(Deserialize)]
struct CxCyDoc {
    cx: Value,
    cy: Value,
}

impl CoarseOffsetTensor {
    /// 直接初始化.
    ///
    /// 前两轴长度必须为 2, 否则程序 panic.
    pub fn new(data: Array4<f64>) -> Self {
        assert_eq!(data.len_of(Axis(0)), 2, "通道轴长度必须为 2");
        assert_eq!(data.len_of(Axis(1)), 2, "分量轴长度必须为 2");
        Self { data }
    }

    /// 从规范化后的 `cx`, `cy` 两部分 (各自形状 `(2, rows, cols)`) 堆叠初始化.
    pub fn from_parts(cx: Array3<f64>, cy: Array3<f64>) -> Result<Self, LoadError> {
        if cx.shape() != cy.shape() {
            return Err(LoadError::BadShape(format!(
                "cx 形状 {:?} 与 cy 形状 {:?} 不一致",
                cx.shape(),
                cy.shape()
            )));
        }
        let data = ndarray::stack(Axis(0), &[cx.view(), cy.view()])
            .map_err(|e| LoadError::BadShape(e.to_string()))?;
        Ok(Self::new(data))
    }

    /// 打开单个 section 的 coarse offset 文件.
    ///
    /// 支持两种上游格式: `coarse.npz` (含 `cx`, `cy` 条目, 可选的
    /// `coarse_mesh` 条目会被忽略) 和 `cx_cy.json`. 其余后缀返回
    /// `Err(LoadError::UnsupportedFormat)`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("npz") => Self::open_npz(path),
            Some("json") => Self::open_json(path),
            _ => Err(LoadError::UnsupportedFormat(path.to_owned())),
        }
    }

    fn open_npz(path: &Path) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(LoadError::Io)?;
        let mut npz = NpzReader::new(file).map_err(LoadError::Npz)?;
        let cx = normalize_dims(npz_entry_f64(&mut npz, "cx")?)?;
        let cy = normalize_dims(npz_entry_f64(&mut npz, "cy")?)?;
        Self::from_parts(cx, cy)
    }

    fn open_json(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(LoadError::Io)?;
        // python 侧 json.dump(allow_nan=True) 会写出裸的 Infinity/NaN 字面量,
        // 标准 JSON 解析器不认. 这些文件只含数字数组, 逐词替换是安全的;
        // 替换为字符串字面量, 由 flatten_into 还原成对应浮点值.
        let text = text
            .replace("-Infinity", "\"-inf\"")
            .replace("Infinity", "\"inf\"")
            .replace("NaN", "\"nan\"");
        let doc: CxCyDoc = serde_json::from_str(&text).map_err(LoadError::Json)?;
        let cx = normalize_dims(nested_to_array(&doc.cx)?)?;
        let cy = normalize_dims(nested_to_array(&doc.cy)?)?;
        Self::from_parts(cx, cy)
    }

    /// 获得底层数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView4<f64> {
        self.data.view()
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array4<f64> {
        self.data
    }

    /// 后两轴的形状, 即对应 tile 网格的 (行数, 列数).
    #[inline]
    pub fn grid_shape(&self) -> Idx2d {
        let &[_, _, h, w] = self.data.shape() else {
            unreachable!()
        };
        (h, w)
    }

    /// 获取通道 `channel` 的三维视图 (分量, 行, 列).
    ///
    /// 当 `channel >= 2` 时 panic.
    #[inline]
    pub fn channel(&self, channel: usize) -> ArrayView3<f64> {
        self.data.index_axis(Axis(0), channel)
    }

    /// 获取通道 `channel` 中网格位置 `pos` 处的 shift 向量 `[x, y]`.
    /// 任一下标越界时返回 `None`.
    pub fn vec_at(&self, channel: usize, (y, x): Idx2d) -> Option<[f64; 2]> {
        let vx = *self.data.get((channel, 0, y, x))?;
        let vy = *self.data.get((channel, 1, y, x))?;
        Some([vx, vy])
    }

    /// 定位张量中所有非有限值的完整坐标 (通道, 分量, 行, 列), 行优先序.
    pub fn locate_non_finite(&self) -> Vec<Idx4d> {
        self.data
            .indexed_iter()
            .filter(|(_, v)| !v.is_finite())
            .map(|(pos, _)| pos)
            .collect()
    }

    /// 该张量的网格形状是否与 `map` 一致?
    #[inline]
    pub fn matches_grid(&self, map: &TileIdMap) -> bool {
        self.grid_shape() == map.shape()
    }
}

/// 读取 npz 条目为 `f64` 动态维数组.
///
/// 上游可能以 float32 或 float64 存储; 先按 f64 读, 失败则按 f32 读后提升.
/// 条目名依照 numpy 惯例带 `.npy` 后缀, 也容忍裸名.
fn npz_entry_f64(npz: &mut NpzReader<File>, name: &str) -> Result<ArrayD<f64>, LoadError> {
    let mut last_err = None;
    for candidate in [format!("{name}.npy"), name.to_owned()] {
        match npz.by_name::<OwnedRepr<f64>, ndarray::IxDyn>(&candidate) {
            Ok(arr) => return Ok(arr),
            Err(e) => last_err = Some(e),
        }
        match npz.by_name::<OwnedRepr<f32>, ndarray::IxDyn>(&candidate) {
            Ok(arr) => return Ok(arr.mapv(f64::from)),
            Err(e) => last_err = Some(e),
        }
    }
    Err(LoadError::Npz(last_err.unwrap()))
}

/// 将 JSON 嵌套数组解析为 `f64` 动态维数组.
///
/// 所有层级必须是矩形的, 叶子必须是数字 (或代表 NaN 的 null),
/// 否则返回 `Err(LoadError::BadShape)`.
fn nested_to_array(value: &Value) -> Result<ArrayD<f64>, LoadError> {
    // 沿第一条路径探出形状, 再递归校验所有分支.
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(arr) = cursor {
        shape.push(arr.len());
        match arr.first() {
            Some(v) => cursor = v,
            None => break,
        }
    }

    let mut flat = Vec::with_capacity(shape.iter().product());
    flatten_into(value, &shape, 0, &mut flat)?;
    ArrayD::from_shape_vec(ndarray::IxDyn(&shape), flat)
        .map_err(|e| LoadError::BadShape(e.to_string()))
}

fn flatten_into(
    value: &Value,
    shape: &[usize],
    depth: usize,
    out: &mut Vec<f64>,
) -> Result<(), LoadError> {
    if depth == shape.len() {
        return match value {
            Value::Number(n) => {
                // `Number` 只能持有有限值, 不会在此处丢失精度.
                out.push(n.as_f64().unwrap_or(f64::NAN));
                Ok(())
            }
            // 非有限值在 open_json 中被替换成了字符串字面量.
            Value::String(s) if s == "inf" => {
                out.push(f64::INFINITY);
                Ok(())
            }
            Value::String(s) if s == "-inf" => {
                out.push(f64::NEG_INFINITY);
                Ok(())
            }
            Value::String(s) if s == "nan" => {
                out.push(f64::NAN);
                Ok(())
            }
            Value::Null => {
                out.push(f64::NAN);
                Ok(())
            }
            other => Err(LoadError::BadShape(format!("期望数字叶子, 得到 {other}"))),
        };
    }
    let Value::Array(arr) = value else {
        return Err(LoadError::BadShape(format!(
            "第 {depth} 层期望数组, 得到标量"
        )));
    };
    if arr.len() != shape[depth] {
        return Err(LoadError::BadShape(format!(
            "第 {depth} 层长度 {} 与首路径长度 {} 不一致",
            arr.len(),
            shape[depth]
        )));
    }
    for v in arr {
        flatten_into(v, shape, depth + 1, out)?;
    }
    Ok(())
}

/// 将上游数组规范化为 `(2, rows, cols)` 形状.
///
/// 不同编码方案会携带多余的前导单例轴 (维数 4 或 5); 规范化规则与上游
/// 对齐: 维数大于 3 时反复在第 1 轴取下标 0, 直到剩下 3 维.
fn normalize_dims(arr: ArrayD<f64>) -> Result<Array3<f64>, LoadError> {
    let mut arr = arr;
    while arr.ndim() > 3 {
        if arr.len_of(Axis(1)) == 0 {
            return Err(LoadError::BadShape(format!(
                "无法在空轴上做单例压缩: {:?}",
                arr.shape()
            )));
        }
        arr = arr.index_axis_move(Axis(1), 0);
    }
    if arr.ndim() != 3 {
        return Err(LoadError::BadShape(format!(
            "期望 3 维 (分量, 行, 列), 得到 {:?}",
            arr.shape()
        )));
    }
    let arr = arr.into_dimensionality::<Ix3>().unwrap();
    if arr.len_of(Axis(0)) != 2 {
        return Err(LoadError::BadShape(format!(
            "分量轴长度必须为 2, 得到 {:?}",
            arr.shape()
        )));
    }
    Ok(arr)
}

/// 从聚合归档条目 (已堆叠的 `(2, 2, rows, cols)` 数组) 恢复张量.
impl TryFrom<Array4<f64>> for CoarseOffsetTensor {
    type Error = LoadError;

    fn try_from(data: Array4<f64>) -> Result<Self, LoadError> {
        if data.len_of(Axis(0)) != 2 || data.len_of(Axis(1)) != 2 {
            return Err(LoadError::BadShape(format!(
                "聚合条目形状应为 (2, 2, rows, cols), 得到 {:?}",
                data.shape()
            )));
        }
        Ok(Self { data })
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_dims, CoarseOffsetTensor};
    use crate::consts::{CHANNEL_CX, CHANNEL_CY};
    use ndarray::{Array, Array3, IxDyn};

    fn filled(shape: &[usize], v: f64) -> ndarray::ArrayD<f64> {
        Array::from_elem(IxDyn(shape), v)
    }

    #[test]
    fn test_normalize_dims() {
        assert_eq!(normalize_dims(filled(&[2, 3, 4], 0.0)).unwrap().shape(), &[2, 3, 4]);
        // 维数 4: 压掉一个前导单例轴.
        assert_eq!(
            normalize_dims(filled(&[2, 1, 3, 4], 0.0)).unwrap().shape(),
            &[2, 3, 4]
        );
        // 维数 5: 压掉两个.
        assert_eq!(
            normalize_dims(filled(&[2, 1, 1, 3, 4], 0.0)).unwrap().shape(),
            &[2, 3, 4]
        );

        assert!(normalize_dims(filled(&[3, 4], 0.0)).is_err());
        assert!(normalize_dims(filled(&[3, 3, 4], 0.0)).is_err());
    }

    #[test]
    fn test_from_parts_mismatch() {
        let cx = Array3::<f64>::zeros((2, 2, 3));
        let cy = Array3::<f64>::zeros((2, 3, 3));
        assert!(CoarseOffsetTensor::from_parts(cx, cy).is_err());
    }

    #[test]
    fn test_vec_at_and_locate() {
        let cx = Array3::<f64>::zeros((2, 2, 2));
        let mut cy = Array3::<f64>::zeros((2, 2, 2));
        cy[(1, 0, 1)] = f64::INFINITY;
        let t = CoarseOffsetTensor::from_parts(cx, cy).unwrap();

        assert_eq!(t.grid_shape(), (2, 2));
        assert_eq!(t.vec_at(CHANNEL_CY, (0, 1)), Some([0.0, f64::INFINITY]));
        assert_eq!(t.vec_at(CHANNEL_CX, (2, 0)), None);
        // (通道 cy, 分量 y, 行 0, 列 1)
        assert_eq!(t.locate_non_finite(), vec![(CHANNEL_CY, 1, 0, 1)]);

        use crate::data::TileIdMap;
        use ndarray::array;
        assert!(t.matches_grid(&TileIdMap::new(array![[1, 2], [3, 4]])));
        assert!(!t.matches_grid(&TileIdMap::new(array![[1, 2]])));
    }

    /// python 侧写出的 JSON 可能带裸 Infinity/NaN 字面量和多余的单例轴.
    #[test]
    fn test_open_json_with_infinity() {
        let dir = std::env::temp_dir();
        let fp = dir.join(format!("sbem_berry_cxcy_{}.json", std::process::id()));

        // cx/cy 形状 (2, 1, 1, 2): 规范化后为 (2, 1, 2).
        let text = concat!(
            "{\"cx\": [[[[1.5, Infinity]]], [[[2.5, -Infinity]]]],",
            " \"cy\": [[[[0.0, NaN]]], [[[0.0, 4.0]]]]}",
        );
        std::fs::write(&fp, text).unwrap();

        let t = CoarseOffsetTensor::open(&fp).unwrap();
        assert_eq!(t.grid_shape(), (1, 2));
        assert_eq!(t.vec_at(CHANNEL_CX, (0, 0)), Some([1.5, 2.5]));
        let [vx, vy] = t.vec_at(CHANNEL_CX, (0, 1)).unwrap();
        assert_eq!(vx, f64::INFINITY);
        assert_eq!(vy, f64::NEG_INFINITY);
        assert!(t.vec_at(CHANNEL_CY, (0, 1)).unwrap()[0].is_nan());

        std::fs::remove_file(&fp).unwrap();
    }
}
