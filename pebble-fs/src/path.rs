//! 路径的字符串操作

pub(crate) trait Path {
    fn is_absolute(&self) -> bool;

    /// 最后一个`/`之后的部分；没有`/`时是整个串。
    ///
    /// 空的basename表示"目录自身"，对按目录打开是合法输入。
    fn base_name(&self) -> &str;

    /// 逐个产出路径分量，空分量(连续的`/`)被剔除
    fn components(&self) -> impl Iterator<Item = &str>;
}

impl Path for str {
    #[inline]
    fn is_absolute(&self) -> bool {
        self.starts_with('/')
    }

    fn base_name(&self) -> &str {
        self.rsplit_once('/').map_or(self, |(_, name)| name)
    }

    fn components(&self) -> impl Iterator<Item = &str> {
        self.split('/').filter(|cmp| !cmp.is_empty())
    }
}
